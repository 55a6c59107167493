//! Client access to the calculation endpoints.
//!
//! [`CalculationApi`] is the seam the view controller talks through;
//! [`HttpApi`] implements it over reqwest and attaches the bearer token from
//! the shared [`SessionState`](crate::session::SessionState).

use async_trait::async_trait;
use uuid::Uuid;

use crate::calculation::Calculation;
use crate::service::{CalculationCreate, CalculationUpdate};

/// Client-visible failure classes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// 401: missing, expired or revoked token.
    #[error("authentication required")]
    Unauthorized,

    /// 404: absent or owned by someone else.
    #[error("calculation not found")]
    NotFound,

    /// 400/422 with the server's explanation.
    #[error("{0}")]
    Rejected(String),

    /// Any other non-success status.
    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait CalculationApi: Send + Sync {
    async fn list(&self) -> Result<Vec<Calculation>, ApiError>;

    async fn get(&self, id: Uuid) -> Result<Calculation, ApiError>;

    async fn create(&self, payload: &CalculationCreate) -> Result<Calculation, ApiError>;

    async fn update(&self, id: Uuid, changes: &CalculationUpdate) -> Result<Calculation, ApiError>;

    async fn delete(&self, id: Uuid) -> Result<(), ApiError>;
}

#[cfg(feature = "client")]
pub use http::HttpApi;

#[cfg(feature = "client")]
mod http {
    use super::*;
    use reqwest::{RequestBuilder, Response};
    use serde::de::DeserializeOwned;

    use crate::login::{TokenResponse, UserLogin};
    use crate::session::{ClientSession, SessionState};

    pub struct HttpApi {
        client: reqwest::Client,
        base_url: String,
        session: SessionState,
    }

    impl HttpApi {
        pub fn new(base_url: impl Into<String>, session: SessionState) -> Self {
            HttpApi {
                client: reqwest::Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                session,
            }
        }

        /// Log in and initialise the shared session with the issued token.
        pub async fn login(&self, username: &str, password: &str) -> Result<ClientSession, ApiError> {
            let body = UserLogin {
                username: username.to_string(),
                password: password.to_string(),
            };
            let response = self
                .client
                .post(self.url("/auth/login"))
                .json(&body)
                .send()
                .await
                .map_err(transport)?;
            let token: TokenResponse = decode(check(response).await?).await?;

            let session = ClientSession::from(token);
            self.session.init(session.clone());
            log::debug!("logged in as {}", username);
            Ok(session)
        }

        /// Revoke the token server-side; the local session is torn down
        /// whatever the server says.
        pub async fn logout(&self) -> Result<(), ApiError> {
            let outcome = match self.session.token() {
                Some(_) => {
                    let response = self
                        .authorized(self.client.post(self.url("/auth/logout")))
                        .send()
                        .await
                        .map_err(transport);
                    match response {
                        Ok(response) => check(response).await.map(|_| ()),
                        Err(e) => Err(e),
                    }
                }
                None => Ok(()),
            };
            self.session.teardown();
            outcome
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }

        fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
            match self.session.token() {
                Some(token) => builder.bearer_auth(token),
                None => builder,
            }
        }

        async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
            let response = self.authorized(builder).send().await.map_err(transport)?;
            check(response).await
        }
    }

    #[async_trait]
    impl CalculationApi for HttpApi {
        async fn list(&self) -> Result<Vec<Calculation>, ApiError> {
            decode(self.send(self.client.get(self.url("/calculations"))).await?).await
        }

        async fn get(&self, id: Uuid) -> Result<Calculation, ApiError> {
            let url = self.url(&format!("/calculations/{id}"));
            decode(self.send(self.client.get(url)).await?).await
        }

        async fn create(&self, payload: &CalculationCreate) -> Result<Calculation, ApiError> {
            let builder = self.client.post(self.url("/calculations")).json(payload);
            decode(self.send(builder).await?).await
        }

        async fn update(
            &self,
            id: Uuid,
            changes: &CalculationUpdate,
        ) -> Result<Calculation, ApiError> {
            let url = self.url(&format!("/calculations/{id}"));
            decode(self.send(self.client.put(url).json(changes)).await?).await
        }

        async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
            let url = self.url(&format!("/calculations/{id}"));
            self.send(self.client.delete(url)).await.map(|_| ())
        }
    }

    fn transport(err: reqwest::Error) -> ApiError {
        ApiError::Transport(err.to_string())
    }

    /// Map non-success statuses onto [`ApiError`].
    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        match code {
            401 => Err(ApiError::Unauthorized),
            404 => Err(ApiError::NotFound),
            _ => {
                let text = response.text().await.unwrap_or_default();
                let detail = detail_of(&text);
                if code == 400 || code == 422 {
                    Err(ApiError::Rejected(detail))
                } else {
                    Err(ApiError::Server {
                        status: code,
                        detail,
                    })
                }
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Transport(format!("invalid response body: {e}")))
    }

    /// The `detail` field of an error body, or the raw text.
    fn detail_of(text: &str) -> String {
        serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|value| value.get("detail").and_then(|d| d.as_str()).map(str::to_string))
            .unwrap_or_else(|| text.trim().to_string())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_detail_of_prefers_json_detail() {
            assert_eq!(detail_of(r#"{"detail":"Cannot divide by zero."}"#), "Cannot divide by zero.");
            assert_eq!(detail_of("plain failure\n"), "plain failure");
        }

        #[test]
        fn test_base_url_is_normalised() {
            let api = HttpApi::new("http://localhost:8000/", SessionState::default());
            assert_eq!(api.url("/calculations"), "http://localhost:8000/calculations");
        }
    }
}
