//! Catalog client.
//!
//! The pipeline only needs two things from the catalog: read rows at a
//! path, and apply a compare-and-swap style update keyed by the values it
//! read. [`CatalogClient`] captures that; [`ErmrestCatalog`] implements it
//! over the ERMrest HTTP API.
//!
//! # Updates
//!
//! An update is sent as an `attributegroup` PUT whose key columns are the
//! *original* values (`o0`, `o1`, ...) and whose target columns are the new
//! values (`n0`, `n1`, ...):
//!
//! ```text
//! PUT /ermrest/catalog/1/attributegroup/Zebrafish:Behavior/o0:=ID,o1:=Raw%20URL;n0:=ID,n1:=Raw%20URL
//! [{"o0": "Bhv001", "o1": null, "n0": "Bhv001", "n1": "/hatrac/Zf/S1/Bhv001.m4v:V1"}]
//! ```
//!
//! Rows only match when every original value still holds, so a record
//! changed by someone else since it was read matches nothing and the
//! catalog answers with an empty array.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::models::{CatalogTable, Row};

/// Result of a guarded catalog update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Applied,
    /// No row held the original values any more.
    Conflict,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch the rows addressed by a catalog-relative path such as
    /// `/entity/Zebrafish:Behavior/ID=Bhv001`.
    async fn get(&self, path: &str) -> Result<Vec<Row>, TransportError>;

    /// Move the row matching `original` to `update`. Both must cover the
    /// same columns.
    async fn update(
        &self,
        table: &CatalogTable,
        original: &Row,
        update: &Row,
    ) -> Result<UpdateStatus, TransportError>;

    /// Verify the catalog is reachable.
    async fn check(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// ERMrest catalog reached over HTTP(S).
pub struct ErmrestCatalog {
    client: reqwest::Client,
    catalog_url: String,
    cookie: Option<String>,
}

impl ErmrestCatalog {
    /// `base_url` is `protocol://host`.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        catalog_id: &str,
        cookie: Option<String>,
    ) -> Self {
        Self {
            client,
            catalog_url: format!(
                "{}/ermrest/catalog/{}",
                base_url.trim_end_matches('/'),
                urlquote(catalog_id)
            ),
            cookie,
        }
    }

    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(cookie) = &self.cookie {
            req = req.header(reqwest::header::COOKIE, cookie);
        }
        req
    }
}

#[async_trait]
impl CatalogClient for ErmrestCatalog {
    async fn get(&self, path: &str) -> Result<Vec<Row>, TransportError> {
        let url = format!("{}{}", self.catalog_url, path);
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        let resp = error_for_status("GET", &url, resp).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        rows_from_json(&url, body)
    }

    async fn update(
        &self,
        table: &CatalogTable,
        original: &Row,
        update: &Row,
    ) -> Result<UpdateStatus, TransportError> {
        let (path, body) = attributegroup_update(table, original, update)
            .map_err(|detail| TransportError::protocol(&self.catalog_url, detail))?;
        let url = format!("{}{}", self.catalog_url, path);
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        let resp = error_for_status("PUT", &url, resp).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        let rows = rows_from_json(&url, body)?;
        Ok(if rows.is_empty() {
            UpdateStatus::Conflict
        } else {
            UpdateStatus::Applied
        })
    }

    async fn check(&self) -> Result<(), TransportError> {
        let url = self.catalog_url.clone();
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        error_for_status("GET", &url, resp).await?;
        Ok(())
    }
}

/// Build the `attributegroup` path and body for a guarded update.
pub fn attributegroup_update(
    table: &CatalogTable,
    original: &Row,
    update: &Row,
) -> Result<(String, Value), String> {
    let mut keys: Vec<&String> = update.keys().collect();
    keys.sort();
    let mut old_keys: Vec<&String> = original.keys().collect();
    old_keys.sort();
    if keys != old_keys {
        return Err(format!(
            "original and update cover different columns: {:?} vs {:?}",
            old_keys, keys
        ));
    }
    if keys.is_empty() {
        return Err("update covers no columns".to_string());
    }

    let aliases = |prefix: &str| {
        keys.iter()
            .enumerate()
            .map(|(i, k)| format!("{}{}:={}", prefix, i, urlquote(k)))
            .collect::<Vec<_>>()
            .join(",")
    };
    let path = format!(
        "/attributegroup/{}:{}/{};{}",
        urlquote(&table.schema),
        urlquote(&table.table),
        aliases("o"),
        aliases("n")
    );

    let mut combined = Row::new();
    for (i, k) in keys.iter().enumerate() {
        combined.insert(format!("o{}", i), original[k.as_str()].clone());
        combined.insert(format!("n{}", i), update[k.as_str()].clone());
    }
    Ok((path, Value::Array(vec![Value::Object(combined)])))
}

fn rows_from_json(url: &str, body: Value) -> Result<Vec<Row>, TransportError> {
    let Value::Array(items) = body else {
        return Err(TransportError::protocol(url, "expected a JSON array of rows"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            _ => Err(TransportError::protocol(url, "row is not a JSON object")),
        })
        .collect()
}

/// Turn a non-2xx response into [`TransportError::Status`].
pub(crate) async fn error_for_status(
    method: &'static str,
    url: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status {
        method,
        url: url.to_string(),
        status,
        body: body.chars().take(500).collect(),
    })
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn urlquote(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn attributegroup_keys_are_sorted_and_quoted() {
        let table = CatalogTable::new("Zebrafish", "Behavior");
        let (path, body) = attributegroup_update(
            &table,
            &row(json!({"Raw URL": null, "ID": "Bhv001"})),
            &row(json!({"ID": "Bhv001", "Raw URL": "/hatrac/x:1"})),
        )
        .unwrap();
        assert_eq!(
            path,
            "/attributegroup/Zebrafish:Behavior/o0:=ID,o1:=Raw%20URL;n0:=ID,n1:=Raw%20URL"
        );
        assert_eq!(
            body,
            json!([{"o0": "Bhv001", "o1": null, "n0": "Bhv001", "n1": "/hatrac/x:1"}])
        );
    }

    #[test]
    fn attributegroup_rejects_mismatched_columns() {
        let table = CatalogTable::new("Zebrafish", "Behavior");
        let err = attributegroup_update(
            &table,
            &row(json!({"ID": "a"})),
            &row(json!({"ID": "a", "URL": "u"})),
        )
        .unwrap_err();
        assert!(err.contains("different columns"));
    }

    #[test]
    fn urlquote_keeps_unreserved() {
        assert_eq!(urlquote("Image Region"), "Image%20Region");
        assert_eq!(urlquote("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(urlquote("x:y/z"), "x%3Ay%2Fz");
    }

    #[test]
    fn catalog_url_is_built_from_base() {
        let c = ErmrestCatalog::new(reqwest::Client::new(), "https://h.org/", "1", None);
        assert_eq!(c.catalog_url(), "https://h.org/ermrest/catalog/1");
    }
}
