use serde::Serialize;

use crate::auth::identity::{DynIdentityProvider, Identity};
use crate::db::models::User;
use crate::moderation::domain::{
    initial_flags, ApprovalChange, Capabilities, Capability, GuardDecision, RouteTarget,
};
use crate::moderation::repository::{DynUserRepository, RepositoryError};
use crate::retry::RetryPolicy;

pub const NOT_ADMIN: &str = "Unauthorized: Not an admin.";
pub const USER_NOT_FOUND: &str = "User not found";
pub const POST_NOT_FOUND: &str = "Post not found";

/// Result shape every admin action returns to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// What the guard decided for a request to a protected route.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    Admit(User),
    /// Path (with query) to send the browser to.
    Redirect(String),
}

/// Fields collected by the agreement form, after the photo was stored.
#[derive(Debug, Clone)]
pub struct AgreementSubmission {
    pub full_name: String,
    pub display_name: Option<String>,
    pub verification_photo_url: String,
}

pub struct ModerationService {
    users: DynUserRepository,
    identity: DynIdentityProvider,
    retry: RetryPolicy,
    admin_email: Option<String>,
}

impl ModerationService {
    pub fn new(
        users: DynUserRepository,
        identity: DynIdentityProvider,
        retry: RetryPolicy,
        admin_email: Option<String>,
    ) -> Self {
        Self {
            users,
            identity,
            retry,
            admin_email,
        }
    }

    pub fn users(&self) -> &DynUserRepository {
        &self.users
    }

    /// Load the caller's profile, creating it on first sight.
    pub async fn ensure_profile(&self, identity: &Identity) -> Result<User, RepositoryError> {
        let flags = initial_flags(&identity.email, self.admin_email.as_deref());
        self.retry
            .run("ensure_profile", || {
                self.users.ensure_profile(&identity.id, &identity.email, flags)
            })
            .await
    }

    /// The single enforcement point for protected routes.
    pub async fn guard(&self, identity: Option<&Identity>) -> GuardOutcome {
        let Some(identity) = identity else {
            return GuardOutcome::Redirect(RouteTarget::Login.path(None));
        };

        let mut user = match self.ensure_profile(identity).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("Could not resolve profile for {}, failing closed: {}", identity.id, e);
                return GuardOutcome::Redirect(RouteTarget::Login.path(None));
            }
        };

        match GuardDecision::evaluate(true, Some(&user)) {
            GuardDecision::Render => GuardOutcome::Admit(user),
            GuardDecision::RenderAfterRepair(repair) => {
                tracing::warn!(
                    "Admin {} is missing agreement fields, filling placeholders",
                    user.id
                );
                match self.users.apply_admin_repair(&user.id, &repair).await {
                    Ok(applied) => tracing::info!("Admin repair for {} applied: {}", user.id, applied),
                    Err(e) => tracing::error!("Admin repair for {} failed: {}", user.id, e),
                }
                repair.apply(&mut user);
                GuardOutcome::Admit(user)
            }
            GuardDecision::Redirect(target) => {
                GuardOutcome::Redirect(target.path(Some(&identity.email)))
            }
        }
    }

    pub async fn complete_agreement(
        &self,
        identity: &Identity,
        submission: AgreementSubmission,
    ) -> Result<User, RepositoryError> {
        self.ensure_profile(identity).await?;

        let display_name = submission
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(submission.full_name.trim());

        let user = self
            .users
            .complete_agreement(
                &identity.id,
                submission.full_name.trim(),
                display_name,
                &submission.verification_photo_url,
            )
            .await?;

        tracing::info!("{} completed the agreement, awaiting approval", identity.id);
        Ok(user)
    }

    /// Re-read the caller's own row. Fails closed.
    pub async fn verify_admin(&self, caller_id: &str) -> bool {
        self.verify(caller_id, Capability::Moderate).await
    }

    /// Re-read the user's row and check one capability. Fails closed, and a
    /// deleted user has none.
    pub async fn verify(&self, user_id: &str, capability: Capability) -> bool {
        match self.retry.run("verify", || self.users.find(user_id)).await {
            Ok(Some(user)) => Capabilities::for_user(Some(&user)).allows(capability),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("{:?} check for {} failed, denying: {}", capability, user_id, e);
                false
            }
        }
    }

    pub async fn approve(&self, caller_id: &str, target_id: &str, approve: bool) -> ActionOutcome {
        self.change_approval(caller_id, target_id, ApprovalChange::from_toggle(approve))
            .await
    }

    pub async fn reject(&self, caller_id: &str, target_id: &str) -> ActionOutcome {
        self.change_approval(caller_id, target_id, ApprovalChange::Reject)
            .await
    }

    async fn change_approval(
        &self,
        caller_id: &str,
        target_id: &str,
        change: ApprovalChange,
    ) -> ActionOutcome {
        if !self.verify_admin(caller_id).await {
            return ActionOutcome::fail(NOT_ADMIN);
        }

        match self.users.set_approval(target_id, change.flags()).await {
            Ok(true) => {
                tracing::info!("{} applied {} to {}", caller_id, change.name(), target_id);
                ActionOutcome::ok()
            }
            Ok(false) => ActionOutcome::fail(USER_NOT_FOUND),
            Err(e) => {
                tracing::error!("Failed to {} {}: {}", change.name(), target_id, e);
                ActionOutcome::fail(format!("Failed to {} user", change.name()))
            }
        }
    }

    pub async fn set_admin(&self, caller_id: &str, target_id: &str, is_admin: bool) -> ActionOutcome {
        if !self.verify_admin(caller_id).await {
            return ActionOutcome::fail(NOT_ADMIN);
        }

        match self.users.set_admin(target_id, is_admin).await {
            Ok(true) => {
                tracing::info!("{} set admin={} on {}", caller_id, is_admin, target_id);
                ActionOutcome::ok()
            }
            Ok(false) => ActionOutcome::fail(USER_NOT_FOUND),
            Err(e) => {
                tracing::error!("Failed to update admin flag on {}: {}", target_id, e);
                ActionOutcome::fail("Failed to update admin status")
            }
        }
    }

    pub async fn delete_user(&self, caller_id: &str, target_id: &str) -> ActionOutcome {
        if !self.verify_admin(caller_id).await {
            return ActionOutcome::fail(NOT_ADMIN);
        }
        if caller_id == target_id {
            return ActionOutcome::fail("You cannot delete your own account.");
        }

        match self.users.delete_cascade(target_id).await {
            Ok(report) => {
                tracing::info!("{} deleted user {}: {:?}", caller_id, target_id, report);
            }
            Err(RepositoryError::NotFound(_)) => return ActionOutcome::fail(USER_NOT_FOUND),
            Err(e) => {
                tracing::error!("Cascade delete of {} failed: {}", target_id, e);
                return ActionOutcome::fail("Failed to delete user");
            }
        }

        // Best effort: the profile is gone either way
        if let Err(e) = self.identity.delete_account(target_id).await {
            tracing::warn!("Could not delete account {}: {}", target_id, e);
        }

        ActionOutcome::ok()
    }

    pub async fn delete_post(&self, caller_id: &str, post_id: &str) -> ActionOutcome {
        if !self.verify_admin(caller_id).await {
            return ActionOutcome::fail(NOT_ADMIN);
        }

        match self.users.delete_post_cascade(post_id).await {
            Ok(true) => {
                tracing::info!("{} deleted post {}", caller_id, post_id);
                ActionOutcome::ok()
            }
            Ok(false) => ActionOutcome::fail(POST_NOT_FOUND),
            Err(e) => {
                tracing::error!("Failed to delete post {}: {}", post_id, e);
                ActionOutcome::fail("Failed to delete post")
            }
        }
    }

    /// Every profile, newest first. `None` when the caller is not an admin.
    pub async fn list_users(&self, caller_id: &str) -> Result<Option<Vec<User>>, RepositoryError> {
        if !self.verify_admin(caller_id).await {
            return Ok(None);
        }
        self.users.list().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::auth::identity::{IdentityError, IdentityProvider};
    use crate::db;
    use crate::moderation::domain::{AdminRepair, ApprovalFlags, InitialFlags};
    use crate::moderation::repository::{
        CascadeReport, ProfileUpdate, SqliteUserRepository, UserRepository,
    };
    use crate::state::DbPool;

    struct RecordingIdentity {
        deleted: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl IdentityProvider for RecordingIdentity {
        async fn sign_up(&self, _: &str, _: &str) -> Result<Identity, IdentityError> {
            Err(IdentityError::InvalidCredentials)
        }

        async fn sign_in(&self, _: &str, _: &str) -> Result<Identity, IdentityError> {
            Err(IdentityError::InvalidCredentials)
        }

        async fn delete_account(&self, _: &str) -> Result<(), IdentityError> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(IdentityError::NotFound)
            } else {
                Ok(())
            }
        }
    }

    /// Fails `find` a fixed number of times before delegating.
    struct FlakyRepo {
        inner: SqliteUserRepository,
        failures_left: AtomicU32,
        transient: bool,
        find_calls: AtomicU32,
    }

    fn sql_error(code: std::os::raw::c_int) -> RepositoryError {
        RepositoryError::Sql(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[async_trait]
    impl UserRepository for FlakyRepo {
        async fn find(&self, id: &str) -> Result<Option<User>, RepositoryError> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(if self.transient {
                    sql_error(rusqlite::ffi::SQLITE_BUSY)
                } else {
                    sql_error(rusqlite::ffi::SQLITE_CORRUPT)
                });
            }
            self.inner.find(id).await
        }

        async fn ensure_profile(
            &self,
            id: &str,
            email: &str,
            initial: InitialFlags,
        ) -> Result<User, RepositoryError> {
            self.inner.ensure_profile(id, email, initial).await
        }

        async fn complete_agreement(
            &self,
            id: &str,
            full_name: &str,
            display_name: &str,
            url: &str,
        ) -> Result<User, RepositoryError> {
            self.inner
                .complete_agreement(id, full_name, display_name, url)
                .await
        }

        async fn update_profile(
            &self,
            id: &str,
            update: &ProfileUpdate,
        ) -> Result<User, RepositoryError> {
            self.inner.update_profile(id, update).await
        }

        async fn set_approval(&self, id: &str, flags: ApprovalFlags) -> Result<bool, RepositoryError> {
            self.inner.set_approval(id, flags).await
        }

        async fn set_admin(&self, id: &str, is_admin: bool) -> Result<bool, RepositoryError> {
            self.inner.set_admin(id, is_admin).await
        }

        async fn apply_admin_repair(
            &self,
            id: &str,
            repair: &AdminRepair,
        ) -> Result<bool, RepositoryError> {
            self.inner.apply_admin_repair(id, repair).await
        }

        async fn list(&self) -> Result<Vec<User>, RepositoryError> {
            self.inner.list().await
        }

        async fn delete_cascade(&self, id: &str) -> Result<CascadeReport, RepositoryError> {
            self.inner.delete_cascade(id).await
        }

        async fn delete_post_cascade(&self, post_id: &str) -> Result<bool, RepositoryError> {
            self.inner.delete_post_cascade(post_id).await
        }
    }

    const ADMIN_EMAIL: &str = "boss@x.com";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn test_pool() -> DbPool {
        let pool = db::memory_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        pool
    }

    fn service_with(
        pool: &DbPool,
        identity_fails: bool,
    ) -> (ModerationService, Arc<RecordingIdentity>) {
        let identity = Arc::new(RecordingIdentity {
            deleted: AtomicU32::new(0),
            fail: identity_fails,
        });
        let service = ModerationService::new(
            Arc::new(SqliteUserRepository::new(pool.clone())),
            identity.clone(),
            fast_retry(),
            Some(ADMIN_EMAIL.to_string()),
        );
        (service, identity)
    }

    fn identity(id: &str, email: &str) -> Identity {
        Identity {
            id: id.to_string(),
            email: email.to_string(),
        }
    }

    async fn signed_up_admin(service: &ModerationService) -> User {
        service
            .ensure_profile(&identity("boss", ADMIN_EMAIL))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_visit_creates_profile_and_redirects_to_agreement() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);

        let outcome = service.guard(Some(&identity("u1", "a@x.com"))).await;
        assert_eq!(
            outcome,
            GuardOutcome::Redirect("/agreement?email=a%40x.com".to_string())
        );

        let user = service.users().find("u1").await.unwrap().unwrap();
        assert!(!user.is_approved);
        assert!(!user.is_rejected);
    }

    #[tokio::test]
    async fn no_session_redirects_to_login() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);
        assert_eq!(
            service.guard(None).await,
            GuardOutcome::Redirect("/login".to_string())
        );
    }

    #[tokio::test]
    async fn configured_admin_bypasses_agreement_and_pending() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);

        let outcome = service.guard(Some(&identity("boss", "BOSS@x.com"))).await;
        let GuardOutcome::Admit(user) = outcome else {
            panic!("admin should be admitted");
        };
        assert!(user.is_admin && user.is_approved);
        assert!(user.agreed_to_terms);

        // The repair was persisted, so the next read needs none
        let stored = service.users().find("boss").await.unwrap().unwrap();
        assert_eq!(AdminRepair::for_user(&stored), None);
    }

    #[tokio::test]
    async fn agreement_then_pending_then_approved() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);
        signed_up_admin(&service).await;
        let member = identity("u1", "a@x.com");

        service
            .complete_agreement(
                &member,
                AgreementSubmission {
                    full_name: " Ada Lovelace ".into(),
                    display_name: None,
                    verification_photo_url: "/uploads/verification-photos/u1/1-a.jpg".into(),
                },
            )
            .await
            .unwrap();

        let user = service.users().find("u1").await.unwrap().unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(
            service.guard(Some(&member)).await,
            GuardOutcome::Redirect("/pending?email=a%40x.com".to_string())
        );

        assert_eq!(service.approve("boss", "u1", true).await, ActionOutcome::ok());
        assert!(matches!(
            service.guard(Some(&member)).await,
            GuardOutcome::Admit(_)
        ));
    }

    #[tokio::test]
    async fn reject_sends_member_to_pending() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);
        signed_up_admin(&service).await;
        let member = identity("u1", "a@x.com");
        service.ensure_profile(&member).await.unwrap();
        service.approve("boss", "u1", true).await;

        assert_eq!(service.reject("boss", "u1").await, ActionOutcome::ok());

        let user = service.users().find("u1").await.unwrap().unwrap();
        assert!(!user.is_approved);
        assert!(user.is_rejected);
    }

    #[tokio::test]
    async fn non_admin_cannot_moderate() {
        let pool = test_pool();
        let (service, identity_provider) = service_with(&pool, false);
        service.ensure_profile(&identity("u1", "a@x.com")).await.unwrap();
        service.ensure_profile(&identity("u2", "b@x.com")).await.unwrap();

        let expected = ActionOutcome::fail(NOT_ADMIN);
        assert_eq!(service.approve("u1", "u2", true).await, expected);
        assert_eq!(service.reject("u1", "u2").await, expected);
        assert_eq!(service.set_admin("u1", "u1", true).await, expected);
        assert_eq!(service.delete_user("u1", "u2").await, expected);
        assert_eq!(service.delete_post("u1", "p1").await, expected);
        assert_eq!(service.list_users("u1").await.unwrap(), None);
        assert_eq!(identity_provider.deleted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_targets_report_not_found() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);
        signed_up_admin(&service).await;

        assert_eq!(
            service.approve("boss", "ghost", true).await,
            ActionOutcome::fail(USER_NOT_FOUND)
        );
        assert_eq!(
            service.delete_user("boss", "ghost").await,
            ActionOutcome::fail(USER_NOT_FOUND)
        );
        assert_eq!(
            service.delete_post("boss", "ghost").await,
            ActionOutcome::fail(POST_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn delete_user_succeeds_even_if_account_removal_fails() {
        let pool = test_pool();
        let (service, identity_provider) = service_with(&pool, true);
        signed_up_admin(&service).await;
        service.ensure_profile(&identity("u1", "a@x.com")).await.unwrap();

        assert_eq!(service.delete_user("boss", "u1").await, ActionOutcome::ok());
        assert_eq!(identity_provider.deleted.load(Ordering::SeqCst), 1);
        assert!(service.users().find("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn admin_cannot_delete_self() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);
        signed_up_admin(&service).await;

        let outcome = service.delete_user("boss", "boss").await;
        assert!(!outcome.success);
        assert!(service.users().find("boss").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn set_admin_grants_moderation() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);
        signed_up_admin(&service).await;
        service.ensure_profile(&identity("u1", "a@x.com")).await.unwrap();
        service.approve("boss", "u1", true).await;

        assert!(!service.verify_admin("u1").await);
        assert_eq!(service.set_admin("boss", "u1", true).await, ActionOutcome::ok());
        assert!(service.verify_admin("u1").await);

        let users = service.list_users("u1").await.unwrap().unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn verify_follows_rejection_and_deletion() {
        let pool = test_pool();
        let (service, _) = service_with(&pool, false);
        signed_up_admin(&service).await;
        service.ensure_profile(&identity("u1", "a@x.com")).await.unwrap();
        service.approve("boss", "u1", true).await;
        assert!(service.verify("u1", Capability::ReadNotifications).await);

        service.reject("boss", "u1").await;
        assert!(!service.verify("u1", Capability::ReadNotifications).await);

        service.delete_user("boss", "u1").await;
        assert!(!service.verify("u1", Capability::ReadNotifications).await);
    }

    fn flaky_service(pool: &DbPool, failures: u32, transient: bool) -> (ModerationService, Arc<FlakyRepo>) {
        let repo = Arc::new(FlakyRepo {
            inner: SqliteUserRepository::new(pool.clone()),
            failures_left: AtomicU32::new(failures),
            transient,
            find_calls: AtomicU32::new(0),
        });
        let service = ModerationService::new(
            repo.clone(),
            Arc::new(RecordingIdentity {
                deleted: AtomicU32::new(0),
                fail: false,
            }),
            fast_retry(),
            Some(ADMIN_EMAIL.to_string()),
        );
        (service, repo)
    }

    #[tokio::test]
    async fn verify_admin_retries_transient_errors() {
        let pool = test_pool();
        let (service, repo) = flaky_service(&pool, 2, true);
        signed_up_admin(&service).await;

        assert!(service.verify_admin("boss").await);
        assert_eq!(repo.find_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn verify_admin_fails_closed_when_retries_run_out() {
        let pool = test_pool();
        let (service, repo) = flaky_service(&pool, 10, true);
        signed_up_admin(&service).await;

        assert!(!service.verify_admin("boss").await);
        assert_eq!(repo.find_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn verify_admin_does_not_retry_permanent_errors() {
        let pool = test_pool();
        let (service, repo) = flaky_service(&pool, 1, false);
        signed_up_admin(&service).await;

        assert!(!service.verify_admin("boss").await);
        assert_eq!(repo.find_calls.load(Ordering::SeqCst), 1);
    }
}
