//! Push permission and subscription management.
//!
//! A thin wrapper over the platform's notification permission and push
//! subscription surface. Permission denial is never an error: scheduled
//! tasks degrade to plain tasks and the page surfaces a warning banner.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("notifications are not supported on this platform")]
    Unsupported,

    #[error("push subscription rejected: {0}")]
    Rejected(String),
}

/// Platform notification permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Not yet asked.
    Default,
    Unsupported,
}

/// An active push subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSubscription {
    pub endpoint: String,
}

/// Combined permission/subscription state reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Subscribed,
    Granted,
    Denied,
    Default,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub status: PushStatus,
    pub subscription: Option<PushSubscription>,
}

/// The platform seam: permission prompts and the push subscription API.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn permission(&self) -> Permission;
    async fn request_permission(&self) -> Permission;
    async fn subscription(&self) -> Option<PushSubscription>;
    async fn subscribe(&self) -> Result<PushSubscription, PushError>;
    async fn unsubscribe(&self) -> bool;
}

#[derive(Clone)]
pub struct PushManager {
    platform: Arc<dyn PushPlatform>,
}

impl PushManager {
    pub fn new(platform: Arc<dyn PushPlatform>) -> Self {
        PushManager { platform }
    }

    pub async fn subscription_status(&self) -> SubscriptionStatus {
        let permission = self.platform.permission();
        if permission == Permission::Unsupported {
            return SubscriptionStatus { status: PushStatus::Unsupported, subscription: None };
        }
        let subscription = self.platform.subscription().await;
        let status = match (permission, &subscription) {
            (Permission::Granted, Some(_)) => PushStatus::Subscribed,
            (Permission::Granted, None) => PushStatus::Granted,
            (Permission::Denied, _) => PushStatus::Denied,
            (Permission::Default, _) => PushStatus::Default,
            (Permission::Unsupported, _) => PushStatus::Unsupported,
        };
        SubscriptionStatus { status, subscription }
    }

    /// Prompt for permission; a grant subscribes immediately. Returns
    /// whether the user ends up subscribed.
    pub async fn request_permission(&self) -> bool {
        if self.platform.permission() == Permission::Unsupported {
            log::error!("notifications are not supported");
            return false;
        }
        match self.platform.request_permission().await {
            Permission::Granted => match self.platform.subscribe().await {
                Ok(_) => true,
                Err(err) => {
                    log::error!("push subscription failed: {err}");
                    false
                }
            },
            _ => false,
        }
    }

    /// Check (and if necessary prompt for) permission before scheduling a
    /// reminder. A previous denial is respected without re-prompting.
    pub async fn ensure_permission(&self) -> bool {
        match self.platform.permission() {
            Permission::Granted => true,
            Permission::Denied | Permission::Unsupported => false,
            Permission::Default => self.platform.request_permission().await == Permission::Granted,
        }
    }

    pub async fn subscribe(&self) -> Result<PushSubscription, PushError> {
        self.platform.subscribe().await
    }

    /// Unsubscribing with no active subscription succeeds.
    pub async fn unsubscribe(&self) -> bool {
        match self.platform.subscription().await {
            Some(_) => self.platform.unsubscribe().await,
            None => true,
        }
    }
}

/// In-memory platform for tests and demos.
pub struct InMemoryPlatform {
    permission: Mutex<Permission>,
    /// What a permission prompt resolves to.
    prompt_answer: Permission,
    subscription: Mutex<Option<PushSubscription>>,
}

impl InMemoryPlatform {
    pub fn granted() -> Self {
        InMemoryPlatform {
            permission: Mutex::new(Permission::Granted),
            prompt_answer: Permission::Granted,
            subscription: Mutex::new(None),
        }
    }

    pub fn denied() -> Self {
        InMemoryPlatform {
            permission: Mutex::new(Permission::Denied),
            prompt_answer: Permission::Denied,
            subscription: Mutex::new(None),
        }
    }

    /// Not yet asked; the prompt will resolve to `answer`.
    pub fn unasked(answer: Permission) -> Self {
        InMemoryPlatform {
            permission: Mutex::new(Permission::Default),
            prompt_answer: answer,
            subscription: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PushPlatform for InMemoryPlatform {
    fn permission(&self) -> Permission {
        self.permission.lock().map(|p| *p).unwrap_or(Permission::Denied)
    }

    async fn request_permission(&self) -> Permission {
        if let Ok(mut permission) = self.permission.lock() {
            if *permission == Permission::Default {
                *permission = self.prompt_answer;
            }
            return *permission;
        }
        Permission::Denied
    }

    async fn subscription(&self) -> Option<PushSubscription> {
        self.subscription.lock().ok()?.clone()
    }

    async fn subscribe(&self) -> Result<PushSubscription, PushError> {
        if self.permission() != Permission::Granted {
            return Err(PushError::Rejected("permission not granted".into()));
        }
        let subscription = PushSubscription { endpoint: "local://push".into() };
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = Some(subscription.clone());
        }
        Ok(subscription)
    }

    async fn unsubscribe(&self) -> bool {
        if let Ok(mut slot) = self.subscription.lock() {
            *slot = None;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grant_subscribes_immediately() {
        let manager = PushManager::new(Arc::new(InMemoryPlatform::unasked(Permission::Granted)));
        assert!(manager.request_permission().await);
        let status = manager.subscription_status().await;
        assert_eq!(status.status, PushStatus::Subscribed);
        assert!(status.subscription.is_some());
    }

    #[tokio::test]
    async fn test_denied_prompt_reports_false() {
        let manager = PushManager::new(Arc::new(InMemoryPlatform::unasked(Permission::Denied)));
        assert!(!manager.request_permission().await);
        assert_eq!(manager.subscription_status().await.status, PushStatus::Denied);
    }

    #[tokio::test]
    async fn test_ensure_permission_respects_prior_denial() {
        let manager = PushManager::new(Arc::new(InMemoryPlatform::denied()));
        assert!(!manager.ensure_permission().await);
    }

    #[tokio::test]
    async fn test_unsubscribe_without_subscription_succeeds() {
        let manager = PushManager::new(Arc::new(InMemoryPlatform::granted()));
        assert!(manager.unsubscribe().await);
    }

    #[tokio::test]
    async fn test_granted_but_unsubscribed_status() {
        let manager = PushManager::new(Arc::new(InMemoryPlatform::granted()));
        let status = manager.subscription_status().await;
        assert_eq!(status.status, PushStatus::Granted);
        assert!(status.subscription.is_none());
    }
}
