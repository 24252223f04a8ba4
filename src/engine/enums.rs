use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::EngineError;

/// Closed enumerations stored as text columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(EngineError::Validation(format!(
                        "unknown {} `{other}`",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(DocumentType {
    Contract => "contract",
    Agreement => "agreement",
    Terms => "terms",
    Policy => "policy",
    Will => "will",
    Trust => "trust",
    Deed => "deed",
    Lease => "lease",
    Residential => "residential",
    Commercial => "commercial",
    Employment => "employment",
    Partnership => "partnership",
    Nda => "nda",
    PowerOfAttorney => "power_of_attorney",
    CourtFiling => "court_filing",
    Memorandum => "memorandum",
    Brief => "brief",
    Motion => "motion",
    Pleading => "pleading",
    Other => "other",
});

text_enum!(DocumentStatus {
    Draft => "draft",
    PendingReview => "pending_review",
    InReview => "in_review",
    PendingApproval => "pending_approval",
    Approved => "approved",
    Rejected => "rejected",
    Completed => "completed",
    Archived => "archived",
    Deleted => "deleted",
});

impl DocumentStatus {
    /// Statuses an owner or editor may set directly.
    pub fn is_editor_settable(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Draft
                | DocumentStatus::PendingReview
                | DocumentStatus::InReview
                | DocumentStatus::PendingApproval
                | DocumentStatus::Completed
        )
    }
}

text_enum!(Priority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
    Critical => "critical",
});

text_enum!(Visibility {
    Private => "private",
    Team => "team",
    Organization => "organization",
    Public => "public",
});

text_enum!(ApprovalStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Approved => "approved",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Escalated => "escalated",
});

impl ApprovalStatus {
    pub const ACTIVE: &'static [ApprovalStatus] = &[
        ApprovalStatus::Pending,
        ApprovalStatus::InProgress,
        ApprovalStatus::Escalated,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn active_strs() -> Vec<&'static str> {
        Self::ACTIVE.iter().map(|status| status.as_str()).collect()
    }
}

text_enum!(SignoffStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Delegated => "delegated",
    Skipped => "skipped",
});

text_enum!(Decision {
    Approve => "approve",
    Reject => "reject",
    RequestChanges => "request_changes",
    Delegate => "delegate",
});

text_enum!(OrganizationRole {
    Owner => "owner",
    Admin => "admin",
    Manager => "manager",
    Member => "member",
    Viewer => "viewer",
});

impl OrganizationRole {
    pub fn is_admin(&self) -> bool {
        matches!(self, OrganizationRole::Owner | OrganizationRole::Admin)
    }

    pub fn can_edit(&self) -> bool {
        matches!(
            self,
            OrganizationRole::Owner | OrganizationRole::Admin | OrganizationRole::Manager
        )
    }
}

text_enum!(TeamRole {
    Lead => "lead",
    Member => "member",
});

text_enum!(NotificationKind {
    ApprovalRequested => "approval_requested",
    ApprovalApproved => "approval_approved",
    ApprovalRejected => "approval_rejected",
    DocumentShared => "document_shared",
});

text_enum!(ConversionDirection {
    LegalToPlain => "legal_to_plain",
    PlainToLegal => "plain_to_legal",
});
