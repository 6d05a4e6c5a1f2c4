//! External state registration
//!
//! Some deployments route provider callbacks through a broker that must learn
//! about a state token before the browser arrives with it. The registerer
//! POSTs the token and our callback location; only `201 Created` counts.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, instrument};

use crate::error::LoginError;

#[derive(Clone)]
pub struct StateRegisterer {
    location: String,
    callback_location: String,
    http: reqwest::Client,
}

impl StateRegisterer {
    pub fn new(location: String, callback_location: String, http: reqwest::Client) -> Self {
        Self {
            location,
            callback_location,
            http,
        }
    }

    /// Tell the broker about `state`.
    #[instrument(skip_all, fields(location = %self.location))]
    pub async fn register(&self, state: &str) -> Result<(), LoginError> {
        let response = self
            .http
            .post(&self.location)
            .header(USER_AGENT, provider::USER_AGENT)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&[
                ("state", state),
                ("location", self.callback_location.as_str()),
            ])
            .send()
            .await
            .map_err(|e| LoginError::RegistrationFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(LoginError::RegistrationFailed(format!(
                "broker returned {status}"
            )));
        }
        debug!("state registered");
        Ok(())
    }
}
