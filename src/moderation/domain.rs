// Domain types - Pure, no side effects
use serde::Serialize;
use std::fmt;

use crate::db::models::User;

pub const ADMIN_PLACEHOLDER_NAME: &str = "Admin User";
pub const ADMIN_PLACEHOLDER_PHOTO: &str = "/assets/img/admin-placeholder.svg";

/// Where a member stands in the onboarding and approval flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationState {
    /// Signed in, no profile row yet
    New,
    /// Profile exists but name, verification photo or terms are missing
    AgreementPending,
    /// Agreement complete, waiting for an admin
    ApprovalPending,
    Approved,
    Rejected,
}

impl ModerationState {
    pub fn of(user: Option<&User>) -> Self {
        let Some(user) = user else {
            return Self::New;
        };

        if !agreement_complete(user) && !is_trusted_admin(user) {
            return Self::AgreementPending;
        }

        if user.is_rejected {
            Self::Rejected
        } else if user.is_approved {
            Self::Approved
        } else {
            Self::ApprovalPending
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::AgreementPending => "agreement_pending",
            Self::ApprovalPending => "approval_pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Where a protected route sends a signed-in user in this state.
    pub fn redirect(&self) -> Option<RouteTarget> {
        match self {
            Self::New | Self::AgreementPending => Some(RouteTarget::Agreement),
            Self::ApprovalPending | Self::Rejected => Some(RouteTarget::Pending),
            Self::Approved => None,
        }
    }
}

impl fmt::Display for ModerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

pub fn agreement_complete(user: &User) -> bool {
    user.agreed_to_terms && present(&user.full_name) && present(&user.verification_photo_url)
}

fn is_trusted_admin(user: &User) -> bool {
    user.is_admin && user.is_approved
}

/// Fixed destinations of the route guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    Login,
    Agreement,
    Pending,
}

impl RouteTarget {
    pub fn path(&self, email: Option<&str>) -> String {
        let base = match self {
            Self::Login => return "/login".to_string(),
            Self::Agreement => "/agreement",
            Self::Pending => "/pending",
        };
        match email {
            Some(email) if !email.is_empty() => {
                let encoded: String = url::form_urlencoded::byte_serialize(email.as_bytes()).collect();
                format!("{}?email={}", base, encoded)
            }
            _ => base.to_string(),
        }
    }
}

/// Placeholder values written for an approved admin whose agreement fields
/// are missing. Only the missing fields are filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminRepair {
    pub full_name: Option<String>,
    pub verification_photo_url: Option<String>,
    pub agreed_to_terms: bool,
}

impl AdminRepair {
    pub fn for_user(user: &User) -> Option<Self> {
        if !is_trusted_admin(user) || agreement_complete(user) {
            return None;
        }
        Some(Self {
            full_name: (!present(&user.full_name)).then(|| ADMIN_PLACEHOLDER_NAME.to_string()),
            verification_photo_url: (!present(&user.verification_photo_url))
                .then(|| ADMIN_PLACEHOLDER_PHOTO.to_string()),
            agreed_to_terms: !user.agreed_to_terms,
        })
    }

    /// Apply to an in-memory copy, mirroring the store update.
    pub fn apply(&self, user: &mut User) {
        if let Some(ref name) = self.full_name {
            user.full_name = Some(name.clone());
        }
        if let Some(ref url) = self.verification_photo_url {
            user.verification_photo_url = Some(url.clone());
        }
        user.agreed_to_terms = true;
    }
}

/// Outcome of evaluating a protected route for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Render,
    RenderAfterRepair(AdminRepair),
    Redirect(RouteTarget),
}

impl GuardDecision {
    /// `signed_in` is false when the request has no valid session.
    pub fn evaluate(signed_in: bool, user: Option<&User>) -> Self {
        if !signed_in {
            return Self::Redirect(RouteTarget::Login);
        }

        if let Some(repair) = user.and_then(AdminRepair::for_user) {
            return Self::RenderAfterRepair(repair);
        }

        match ModerationState::of(user).redirect() {
            Some(target) => Self::Redirect(target),
            None => Self::Render,
        }
    }
}

/// Things a member can do. Everything except finishing the agreement and
/// looking at the pending page requires approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewContent,
    CreatePost,
    Comment,
    Vote,
    ManageAlerts,
    ReadNotifications,
    EditProfile,
    CompleteAgreement,
    ViewPendingStatus,
    Moderate,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Capability::ViewContent,
        Capability::CreatePost,
        Capability::Comment,
        Capability::Vote,
        Capability::ManageAlerts,
        Capability::ReadNotifications,
        Capability::EditProfile,
        Capability::CompleteAgreement,
        Capability::ViewPendingStatus,
        Capability::Moderate,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities(Vec<Capability>);

impl Capabilities {
    pub fn for_user(user: Option<&User>) -> Self {
        let state = ModerationState::of(user);
        let is_admin = user.is_some_and(|u| u.is_admin);

        let allowed = Capability::ALL
            .into_iter()
            .filter(|cap| match cap {
                Capability::CompleteAgreement => {
                    matches!(state, ModerationState::New | ModerationState::AgreementPending)
                }
                Capability::ViewPendingStatus => matches!(
                    state,
                    ModerationState::ApprovalPending | ModerationState::Rejected
                ),
                Capability::Moderate => state == ModerationState::Approved && is_admin,
                _ => state == ModerationState::Approved,
            })
            .collect();

        Self(allowed)
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

/// Admin decision on a member's approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalChange {
    Approve,
    /// Back to pending without rejecting
    Revoke,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApprovalFlags {
    pub is_approved: bool,
    pub is_rejected: bool,
}

impl ApprovalChange {
    pub fn from_toggle(approve: bool) -> Self {
        if approve {
            Self::Approve
        } else {
            Self::Revoke
        }
    }

    pub fn flags(&self) -> ApprovalFlags {
        match self {
            Self::Approve => ApprovalFlags {
                is_approved: true,
                is_rejected: false,
            },
            Self::Revoke => ApprovalFlags {
                is_approved: false,
                is_rejected: false,
            },
            Self::Reject => ApprovalFlags {
                is_approved: false,
                is_rejected: true,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Revoke => "revoke",
            Self::Reject => "reject",
        }
    }
}

/// Flags for a brand-new profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialFlags {
    pub is_approved: bool,
    pub is_admin: bool,
}

pub fn initial_flags(email: &str, admin_email: Option<&str>) -> InitialFlags {
    let bootstrap = admin_email
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .is_some_and(|a| a.eq_ignore_ascii_case(email.trim()));

    InitialFlags {
        is_approved: bootstrap,
        is_admin: bootstrap,
    }
}
