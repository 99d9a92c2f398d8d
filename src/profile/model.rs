use serde::{Deserialize, Serialize};

/// Application record attached to an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Same value as the owning `Identity.id`
    pub id: String,
    pub display_name: Option<String>,
    /// Earned currency ("crystals")
    pub primary_balance: i64,
    /// Purchased currency ("diamonds")
    pub premium_balance: i64,
    pub is_premium: bool,
}

impl Profile {
    /// The virtual record used when the store has none for `identity_id`
    pub fn default_for(identity_id: impl Into<String>) -> Self {
        Self {
            id: identity_id.into(),
            display_name: None,
            primary_balance: 0,
            premium_balance: 0,
            is_premium: false,
        }
    }

    /// Default record carrying a display name, as created at sign-up
    pub fn new_account(identity_id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            display_name,
            ..Self::default_for(identity_id)
        }
    }
}

/// Fields the sync core reads from the profile store
///
/// Lookups always pass an explicit list so new store columns never change
/// what the core receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Id,
    DisplayName,
    PrimaryBalance,
    PremiumBalance,
    IsPremium,
}

impl ProfileField {
    /// Every field of [`Profile`], in column order
    pub const ALL: &'static [ProfileField] = &[
        ProfileField::Id,
        ProfileField::DisplayName,
        ProfileField::PrimaryBalance,
        ProfileField::PremiumBalance,
        ProfileField::IsPremium,
    ];

    /// Column name in the `profiles` table
    pub fn column(self) -> &'static str {
        match self {
            ProfileField::Id => "id",
            ProfileField::DisplayName => "username",
            ProfileField::PrimaryBalance => "crystals",
            ProfileField::PremiumBalance => "ouros",
            ProfileField::IsPremium => "is_premium",
        }
    }

    /// Comma-separated projection for a field list
    pub fn projection(fields: &[ProfileField]) -> String {
        fields
            .iter()
            .map(|field| field.column())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Partial update of a profile; `None` leaves a field untouched
///
/// `display_name: Some(None)` clears the name. Stores build their own wire
/// form from the set fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub display_name: Option<Option<String>>,
    pub primary_balance: Option<i64>,
    pub premium_balance: Option<i64>,
    pub is_premium: Option<bool>,
}

impl ProfilePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display_name(mut self, name: Option<String>) -> Self {
        self.display_name = Some(name);
        self
    }

    pub fn primary_balance(mut self, balance: i64) -> Self {
        self.primary_balance = Some(balance);
        self
    }

    pub fn premium_balance(mut self, balance: i64) -> Self {
        self.premium_balance = Some(balance);
        self
    }

    pub fn premium(mut self, is_premium: bool) -> Self {
        self.is_premium = Some(is_premium);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.primary_balance.is_none()
            && self.premium_balance.is_none()
            && self.is_premium.is_none()
    }

    /// Apply the set fields to a profile in place
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(name) = &self.display_name {
            profile.display_name = name.clone();
        }
        if let Some(balance) = self.primary_balance {
            profile.primary_balance = balance;
        }
        if let Some(balance) = self.premium_balance {
            profile.premium_balance = balance;
        }
        if let Some(is_premium) = self.is_premium {
            profile.is_premium = is_premium;
        }
    }
}
