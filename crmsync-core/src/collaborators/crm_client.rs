//! HTTP client for a remote CRM object API (`GET /objects/{type}/{id}`).

use super::{CollaboratorError, CrmSource};
use crate::config::CrmConfig;
use async_trait::async_trait;
use crmsync_sdk::objects::CrmObjectResponse;
use serde_json::{Map, Value};
use url::Url;

pub struct HttpCrmClient {
    base_url: Url,
    http_client: reqwest::Client,
}

impl HttpCrmClient {
    pub fn new(base_url: Url, config: &CrmConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()?;
        Ok(Self {
            base_url,
            http_client,
        })
    }

    fn object_url(&self, object_type: &str, object_id: &str) -> Result<Url, CollaboratorError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::Rejected {
                status: 0,
                body: format!("{} cannot be a base url", self.base_url),
            })?
            .pop_if_empty()
            .extend(["objects", object_type, object_id]);
        Ok(url)
    }
}

#[async_trait]
impl CrmSource for HttpCrmClient {
    #[tracing::instrument(skip(self), err)]
    async fn fetch_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<Map<String, Value>>, CollaboratorError> {
        let url = self.object_url(object_type, object_id)?;
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(status, body));
        }
        let object: CrmObjectResponse = response.json().await?;
        Ok(Some(object.properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::serve;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    #[test]
    fn object_url_appends_segments() {
        let client = HttpCrmClient::new(
            Url::parse("http://crm.local/api/").unwrap(),
            &CrmConfig::default(),
        )
        .unwrap();
        assert_eq!(
            client.object_url("company", "42").unwrap().as_str(),
            "http://crm.local/api/objects/company/42"
        );
    }

    /// Answers with the status named by the object id, or the object itself.
    async fn object(Path((object_type, object_id)): Path<(String, String)>) -> Response {
        match object_id.parse::<u16>().ok().and_then(|c| StatusCode::from_u16(c).ok()) {
            Some(status) if !status.is_success() => status.into_response(),
            _ => Json(json!({
                "id": object_id,
                "objectType": object_type,
                "properties": {"amount": 5, "dealstage": "won"},
                "createdAt": 0,
                "updatedAt": 0
            }))
            .into_response(),
        }
    }

    async fn client() -> HttpCrmClient {
        let addr = serve(Router::new().route("/objects/{object_type}/{object_id}", get(object))).await;
        HttpCrmClient::new(
            Url::parse(&format!("http://{addr}/")).unwrap(),
            &CrmConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_returns_object_properties() {
        let properties = client().await.fetch_object("deal", "7").await.unwrap().unwrap();
        assert_eq!(properties["amount"], 5);
        assert_eq!(properties["dealstage"], "won");
    }

    #[tokio::test]
    async fn missing_object_is_none() {
        assert!(client().await.fetch_object("deal", "404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_statuses_are_classified() {
        let client = client().await;
        let err = client.fetch_object("deal", "503").await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
        for code in ["401", "403"] {
            let err = client.fetch_object("deal", code).await.unwrap_err();
            assert!(matches!(err, CollaboratorError::Unauthorized(_)), "{code}: {err:?}");
        }
        let err = client.fetch_object("deal", "422").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected { status: 422, .. }));
    }

    #[tokio::test]
    async fn unreachable_crm_is_transient() {
        let client = HttpCrmClient::new(
            Url::parse("http://127.0.0.1:9/").unwrap(),
            &CrmConfig::default(),
        )
        .unwrap();
        assert!(client.fetch_object("deal", "1").await.unwrap_err().is_transient());
    }
}
