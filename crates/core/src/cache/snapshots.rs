//! Response snapshot storage inside a generation.
//!
//! Provides reads, last-write-wins upserts and all-or-nothing population of
//! a generation from the network.

use bytes::Bytes;
use futures_util::future::try_join_all;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;
use url::Url;

use super::generations::Generation;
use crate::Error;
use crate::identity::ResourceIdentity;
use crate::net::{Fetcher, HttpResponse, ResponseKind};

const UPSERT_ENTRY: &str = "INSERT INTO entries (
        generation, key_hash, method, url, status_code, headers_json, body, stored_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    ON CONFLICT(generation, key_hash) DO UPDATE SET
        method = excluded.method,
        url = excluded.url,
        status_code = excluded.status_code,
        headers_json = excluded.headers_json,
        body = excluded.body,
        stored_at = excluded.stored_at";

/// Immutable capture of a response at the moment it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    pub url: String,
    pub status_code: u16,
    /// Header pairs in the order the response carried them. Values are kept
    /// as raw bytes since they need not be UTF-8.
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
    pub stored_at: String,
}

impl ResponseSnapshot {
    /// Capture a response for storage without consuming it.
    pub fn capture(response: &HttpResponse) -> Self {
        let copy = response.duplicate();
        let headers = copy
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: copy.url.to_string(),
            status_code: copy.status.as_u16(),
            headers,
            body: copy.body,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Rebuild a servable same-origin response from the snapshot.
    pub fn to_response(&self) -> Result<HttpResponse, Error> {
        let status = StatusCode::from_u16(self.status_code)
            .map_err(|e| Error::CorruptEntry(format!("status {}: {e}", self.status_code)))?;
        let url = Url::parse(&self.url).map_err(|e| Error::CorruptEntry(format!("url {}: {e}", self.url)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::CorruptEntry(format!("header name {name}: {e}")))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| Error::CorruptEntry(format!("header value for {name}: {e}")))?;
            headers.append(name, value);
        }

        Ok(HttpResponse { status, headers, body: self.body.clone(), kind: ResponseKind::Basic, url })
    }
}

impl Generation {
    /// Get the snapshot stored for an identity.
    ///
    /// Returns None if the identity is not cached in this generation.
    pub async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ResponseSnapshot>, Error> {
        let generation = self.name.clone();
        let key = identity.cache_key();
        self.db
            .conn
            .call(move |conn| -> Result<Option<ResponseSnapshot>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT url, status_code, headers_json, body, stored_at
                    FROM entries WHERE generation = ?1 AND key_hash = ?2",
                )?;

                let result = stmt.query_row(params![generation, key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                });

                match result {
                    Ok((url, status, headers_json, body, stored_at)) => Ok(Some(ResponseSnapshot {
                        url,
                        status_code: u16::try_from(status)
                            .map_err(|_| Error::CorruptEntry(format!("status {status} out of range")))?,
                        headers: serde_json::from_str(&headers_json)?,
                        body: Bytes::from(body),
                        stored_at,
                    })),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace the snapshot for an identity.
    ///
    /// Concurrent writers to the same identity race; the last write wins.
    pub async fn put(&self, identity: &ResourceIdentity, snapshot: &ResponseSnapshot) -> Result<(), Error> {
        self.write_batch(vec![(identity.clone(), snapshot.clone())]).await?;
        Ok(())
    }

    /// Fetch every identity and store all of them, or none.
    ///
    /// Fetches run concurrently. A network error or a response that is not
    /// storable (status 200, same-origin) fails the whole call before anything
    /// is written.
    pub async fn put_all(&self, identities: &[ResourceIdentity], fetcher: &dyn Fetcher) -> Result<usize, Error> {
        let fetches = identities.iter().map(|identity| async move {
            let response = fetcher.fetch(&identity.to_request()).await?;
            if !response.is_storable() {
                return Err(Error::HttpError(format!(
                    "{identity}: status {} ({:?})",
                    response.status.as_u16(),
                    response.kind
                )));
            }
            Ok::<_, Error>((identity.clone(), ResponseSnapshot::capture(&response)))
        });

        let entries = try_join_all(fetches).await?;
        self.write_batch(entries).await
    }

    /// Number of entries in this generation.
    pub async fn len(&self) -> Result<usize, Error> {
        let generation = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE generation = ?1", params![generation], |row| {
                        row.get(0)
                    })?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }

    /// URLs of all entries, sorted.
    pub async fn urls(&self) -> Result<Vec<String>, Error> {
        let generation = self.name.clone();
        self.db
            .conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT url FROM entries WHERE generation = ?1 ORDER BY url")?;
                let urls = stmt
                    .query_map(params![generation], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(urls)
            })
            .await
            .map_err(Error::from)
    }

    async fn write_batch(&self, entries: Vec<(ResourceIdentity, ResponseSnapshot)>) -> Result<usize, Error> {
        let generation = self.name.clone();
        let rows = entries
            .into_iter()
            .map(|(identity, snapshot)| {
                let headers_json = serde_json::to_string(&snapshot.headers)?;
                Ok((identity.cache_key(), identity.method().to_string(), snapshot, headers_json))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        self.db
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(UPSERT_ENTRY)?;
                    for (key, method, snapshot, headers_json) in &rows {
                        stmt.execute(params![
                            &generation,
                            key,
                            method,
                            &snapshot.url,
                            i64::from(snapshot.status_code),
                            headers_json,
                            snapshot.body.as_ref(),
                            &snapshot.stored_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await
            .map_err(Error::from)
    }
}
