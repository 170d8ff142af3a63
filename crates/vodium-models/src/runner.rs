//! Registered runner processes and registration tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RunnerId;

/// A one-or-many-use token an administrator hands out so a runner process
/// can register itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationToken {
    /// Stable id, recorded on every runner registered with it
    pub id: String,
    /// The secret presented at registration time
    #[serde(skip_serializing, default)]
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl RegistrationToken {
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token: format!("vrrt-{}", Uuid::new_v4()),
            created_at: Utc::now(),
        }
    }
}

/// A detachable worker process registered with this server.
///
/// Runners are reachable only through the claim protocol; the credential
/// below is the long-lived secret they authenticate every call with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: RunnerId,

    /// Operator-chosen display name
    pub name: String,

    /// Registration token this runner redeemed
    pub registration_token_id: String,

    /// Long-lived credential; never serialized outward
    #[serde(skip_serializing, default)]
    pub token: String,

    /// Last authenticated protocol call
    pub last_contact_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
}

impl Runner {
    pub fn new(name: impl Into<String>, registration_token_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: RunnerId::new(),
            name: name.into(),
            registration_token_id: registration_token_id.into(),
            token: format!("vrt-{}", Uuid::new_v4()),
            last_contact_at: now,
            created_at: now,
        }
    }

    pub fn touch_contact(&mut self) {
        self.last_contact_at = Utc::now();
    }
}
