use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::adapters::http_client::{read_json, ApiFailure, BearerToken, RestClient};
use crate::config::{BackendConfig, ProfileConfig};
use crate::error::{self, PetcareResult};
use crate::profile::model::{Profile, ProfileField, ProfilePatch};
use crate::profile::store::ProfileStore;

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
/// "JSON object requested, multiple (or no) rows returned"
const NO_ROWS: &str = "PGRST116";

/// Row shape of the `profiles` table
#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    crystals: Option<i64>,
    #[serde(default)]
    ouros: Option<i64>,
    #[serde(default)]
    is_premium: Option<bool>,
}

impl ProfileRow {
    /// Columns outside the projection come back absent and read as defaults
    fn into_profile(self, identity_id: &str) -> Profile {
        Profile {
            id: self.id.unwrap_or_else(|| identity_id.to_string()),
            display_name: self.username,
            primary_balance: self.crystals.unwrap_or(0),
            premium_balance: self.ouros.unwrap_or(0),
            is_premium: self.is_premium.unwrap_or(false),
        }
    }
}

impl From<&Profile> for ProfileRow {
    fn from(profile: &Profile) -> Self {
        Self {
            id: Some(profile.id.clone()),
            username: profile.display_name.clone(),
            crystals: Some(profile.primary_balance),
            ouros: Some(profile.premium_balance),
            is_premium: Some(profile.is_premium),
        }
    }
}

fn patch_body(patch: &ProfilePatch) -> Value {
    let mut body = Map::new();
    if let Some(name) = &patch.display_name {
        body.insert(ProfileField::DisplayName.column().to_string(), Value::from(name.clone()));
    }
    if let Some(balance) = patch.primary_balance {
        body.insert(ProfileField::PrimaryBalance.column().to_string(), Value::from(balance));
    }
    if let Some(balance) = patch.premium_balance {
        body.insert(ProfileField::PremiumBalance.column().to_string(), Value::from(balance));
    }
    if let Some(is_premium) = patch.is_premium {
        body.insert(ProfileField::IsPremium.column().to_string(), Value::from(is_premium));
    }
    Value::Object(body)
}

fn is_no_rows(failure: &ApiFailure) -> bool {
    failure.status == StatusCode::NOT_ACCEPTABLE && failure.body.has_code(NO_ROWS)
}

/// Profile store backed by a PostgREST endpoint
pub struct PostgrestProfileStore {
    rest: RestClient,
    table: String,
    bearer: BearerToken,
}

impl PostgrestProfileStore {
    pub fn new(backend: &BackendConfig, profiles: &ProfileConfig, bearer: BearerToken) -> PetcareResult<Self> {
        Ok(Self::with_client(RestClient::new(backend)?, &profiles.table, bearer))
    }

    pub fn with_client(rest: RestClient, table: &str, bearer: BearerToken) -> Self {
        Self {
            rest,
            table: table.to_string(),
            bearer,
        }
    }

    fn path(&self) -> String {
        format!("/rest/v1/{}", self.table)
    }

    /// Request authorized as the signed-in user, else as the anon role
    async fn request(&self, method: Method) -> RequestBuilder {
        let token = self
            .bearer
            .get()
            .await
            .unwrap_or_else(|| self.rest.anon_key().to_string());
        self.rest
            .authorized(method, &self.path(), &token)
            .header(ACCEPT, SINGLE_OBJECT)
    }
}

#[async_trait]
impl ProfileStore for PostgrestProfileStore {
    async fn get(&self, identity_id: &str, fields: &[ProfileField]) -> PetcareResult<Option<Profile>> {
        let projection = ProfileField::projection(fields);
        trace!(identity = %identity_id, select = %projection, "Fetching profile");

        let response = self
            .request(Method::GET)
            .await
            .query(&[("id", format!("eq.{}", identity_id)), ("select", projection)])
            .send()
            .await;

        match read_json::<ProfileRow, _>(response, |e| error::store_request_failed("get", e)).await? {
            Ok(row) => Ok(Some(row.into_profile(identity_id))),
            Err(failure) if is_no_rows(&failure) => {
                debug!(identity = %identity_id, "No profile row");
                Ok(None)
            }
            Err(failure) => Err(error::store_request_failed("get", failure.describe())),
        }
    }

    async fn insert(&self, profile: &Profile) -> PetcareResult<Profile> {
        let response = self
            .request(Method::POST)
            .await
            .header("Prefer", "return=representation")
            .json(&ProfileRow::from(profile))
            .send()
            .await;

        match read_json::<ProfileRow, _>(response, |e| error::store_request_failed("insert", e)).await? {
            Ok(row) => Ok(row.into_profile(&profile.id)),
            Err(failure) => Err(error::store_request_failed("insert", failure.describe())),
        }
    }

    async fn update(&self, identity_id: &str, patch: &ProfilePatch) -> PetcareResult<Profile> {
        if patch.is_empty() {
            return self
                .get(identity_id, ProfileField::ALL)
                .await?
                .ok_or_else(|| error::profile_not_found(identity_id));
        }

        let response = self
            .request(Method::PATCH)
            .await
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", identity_id))])
            .json(&patch_body(patch))
            .send()
            .await;

        match read_json::<ProfileRow, _>(response, |e| error::store_request_failed("update", e)).await? {
            Ok(row) => Ok(row.into_profile(identity_id)),
            Err(failure) if is_no_rows(&failure) => Err(error::profile_not_found(identity_id)),
            Err(failure) => Err(error::store_request_failed("update", failure.describe())),
        }
    }
}
