//! GitLab REST API v4 client.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{
    CommitQuery, Page, PageInfo, ProjectQuery, RemoteCommit, RemoteContributor, RemoteUser,
    SourceClient,
};
use crate::errors::SourceError;
use crate::models::ProjectId;

const API_SUFFIX: &str = "/api/v4";
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct UserDto {
    name: String,
    username: String,
    email: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct EmailDto {
    email: String,
    confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ProjectDto {
    id: ProjectId,
}

#[derive(Debug, Deserialize)]
struct ContributorDto {
    #[serde(default)]
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct CommitDto {
    id: String,
    #[serde(default)]
    short_id: String,
    #[serde(default)]
    author_email: String,
    #[serde(default)]
    committer_email: String,
    committed_date: Option<DateTime<Utc>>,
}

/// Asynchronous GitLab REST API client.
#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    api_url: String,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl GitLabClient {
    /// Create a client for the instance at `base_url` authenticating with a
    /// personal access token. `requests_per_second = 0` disables pacing.
    pub fn new(base_url: &str, token: &str, requests_per_second: u32) -> Result<Self, SourceError> {
        let api_url = api_url(base_url);

        let mut token_value = HeaderValue::from_str(token).map_err(|_| {
            SourceError::AuthenticationFailed("token contains characters not allowed in a header".into())
        })?;
        token_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("contribsync/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert("private-token", token_value);

        let http = reqwest::Client::builder().default_headers(headers).build()?;
        let limiter = NonZeroU32::new(requests_per_second)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        info!(api_url = %api_url, requests_per_second, "created GitLabClient");
        Ok(Self {
            http,
            api_url,
            limiter,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(T, HeaderMap), SourceError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}{}", self.api_url, path);
        let resp = self.http.get(&url).query(query).send().await?;
        let resp = check_response(resp).await?;
        let headers = resp.headers().clone();
        let body = resp.text().await?;
        let value = serde_json::from_str(&body)
            .map_err(|e| SourceError::ParseError(format!("{path}: {e}")))?;
        Ok((value, headers))
    }
}

#[async_trait]
impl SourceClient for GitLabClient {
    #[instrument(skip(self))]
    async fn current_user(&self) -> Result<RemoteUser, SourceError> {
        let (user, _): (UserDto, _) = self.get_json("/user", &[]).await?;
        debug!(username = %user.username, "fetched current user");
        Ok(RemoteUser {
            name: user.name,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
        })
    }

    #[instrument(skip(self))]
    async fn verified_emails(&self) -> Result<Vec<String>, SourceError> {
        let (emails, _): (Vec<EmailDto>, _) = self.get_json("/user/emails", &[]).await?;
        let verified: Vec<String> = emails
            .into_iter()
            .filter(|e| e.confirmed_at.is_some())
            .map(|e| e.email)
            .collect();
        debug!(count = verified.len(), "fetched verified emails");
        Ok(verified)
    }

    #[instrument(skip(self), fields(page = query.page, id_after = query.id_after))]
    async fn list_projects(&self, query: ProjectQuery) -> Result<Page<ProjectId>, SourceError> {
        let params = [
            ("page", query.page.to_string()),
            ("per_page", query.per_page.to_string()),
            ("order_by", "id".to_string()),
            ("sort", "asc".to_string()),
            ("simple", "true".to_string()),
            ("membership", "true".to_string()),
            ("id_after", query.id_after.to_string()),
        ];
        let (projects, headers): (Vec<ProjectDto>, _) = self.get_json("/projects", &params).await?;
        debug!(count = projects.len(), "fetched project page");
        Ok(Page {
            items: projects.into_iter().map(|p| p.id).collect(),
            info: parse_page_info(&headers, query.page),
        })
    }

    #[instrument(skip(self))]
    async fn list_contributors(
        &self,
        project_id: ProjectId,
        page: u32,
        per_page: u32,
    ) -> Result<Page<RemoteContributor>, SourceError> {
        let path = format!("/projects/{project_id}/repository/contributors");
        let params = [("page", page.to_string()), ("per_page", per_page.to_string())];
        let (contributors, headers): (Vec<ContributorDto>, _) = self.get_json(&path, &params).await?;
        Ok(Page {
            items: contributors
                .into_iter()
                .map(|c| RemoteContributor {
                    name: c.name,
                    email: c.email,
                })
                .collect(),
            info: parse_page_info(&headers, page),
        })
    }

    #[instrument(skip(self), fields(page = query.page))]
    async fn list_commits(
        &self,
        project_id: ProjectId,
        query: CommitQuery,
    ) -> Result<Page<RemoteCommit>, SourceError> {
        let path = format!("/projects/{project_id}/repository/commits");
        let params = [
            ("page", query.page.to_string()),
            ("per_page", query.per_page.to_string()),
            ("since", query.since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("all", "true".to_string()),
        ];
        let (commits, headers): (Vec<CommitDto>, _) = self.get_json(&path, &params).await?;
        debug!(count = commits.len(), "fetched commit page");
        Ok(Page {
            items: commits
                .into_iter()
                .map(|c| RemoteCommit {
                    id: c.id,
                    short_id: c.short_id,
                    author_email: c.author_email,
                    committer_email: c.committer_email,
                    committed_date: c.committed_date,
                })
                .collect(),
            info: parse_page_info(&headers, query.page),
        })
    }
}

/// Normalize a user-supplied instance address into the v4 API root.
fn api_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with(API_SUFFIX) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{API_SUFFIX}")
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(SourceError::AuthenticationFailed(format!("HTTP {}", status)));
    }
    if status.as_u16() == 429 {
        let reset = header_str(resp.headers(), "ratelimit-reset")
            .or_else(|| header_str(resp.headers(), "retry-after"))
            .unwrap_or("unknown")
            .to_string();
        return Err(SourceError::RateLimited { reset_at: reset });
    }
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(SourceError::ApiError {
        status: status.as_u16(),
        body,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

/// Read GitLab's offset-pagination headers.
fn parse_page_info(headers: &HeaderMap, requested_page: u32) -> PageInfo {
    PageInfo {
        current_page: header_u32(headers, "x-page").unwrap_or(requested_page),
        total_pages: header_u32(headers, "x-total-pages"),
        next_page: header_u32(headers, "x-next-page"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_api_url_normalization() {
        assert_eq!(api_url("https://gitlab.com"), "https://gitlab.com/api/v4");
        assert_eq!(api_url("https://gitlab.com/"), "https://gitlab.com/api/v4");
        assert_eq!(
            api_url("https://git.example.com:8443/api/v4/"),
            "https://git.example.com:8443/api/v4"
        );
    }

    #[test]
    fn test_parse_page_info_full() {
        let info = parse_page_info(
            &headers(&[("x-page", "2"), ("x-total-pages", "5"), ("x-next-page", "3")]),
            2,
        );
        assert_eq!(
            info,
            PageInfo {
                current_page: 2,
                total_pages: Some(5),
                next_page: Some(3),
            }
        );
    }

    #[test]
    fn test_parse_page_info_large_result_set() {
        // Above ~10k rows GitLab sends the total headers empty.
        let info = parse_page_info(
            &headers(&[("x-page", "101"), ("x-total-pages", ""), ("x-next-page", "102")]),
            101,
        );
        assert_eq!(info.total_pages, None);
        assert_eq!(info.following(100, 100), Some(102));
    }

    #[test]
    fn test_parse_page_info_last_page() {
        let info = parse_page_info(&headers(&[("x-total-pages", "1"), ("x-next-page", "")]), 1);
        assert_eq!(info.current_page, 1);
        assert_eq!(info.next_page, None);
        assert_eq!(info.following(3, 100), None);
    }

    #[test]
    fn test_commit_payload_deserializes() {
        let body = r#"[{
            "id": "ed899a2f4b50b4370feeea94676502b42383c746",
            "short_id": "ed899a2f4b5",
            "title": "Replace sanitize with escape once",
            "author_name": "Example User",
            "author_email": "user@example.com",
            "committer_name": "Administrator",
            "committer_email": "admin@example.com",
            "committed_date": "2021-09-20T09:06:12.300+03:00"
        }]"#;
        let commits: Vec<CommitDto> = serde_json::from_str(body).unwrap();
        assert_eq!(commits[0].short_id, "ed899a2f4b5");
        assert_eq!(
            commits[0].committed_date.unwrap().to_rfc3339_opts(SecondsFormat::Secs, true),
            "2021-09-20T06:06:12Z"
        );
    }

    #[test]
    fn test_email_payload_keeps_confirmation() {
        let body = r#"[
            {"id": 1, "email": "a@x.com", "confirmed_at": "2021-03-26T19:07:56.248Z"},
            {"id": 2, "email": "pending@x.com", "confirmed_at": null}
        ]"#;
        let emails: Vec<EmailDto> = serde_json::from_str(body).unwrap();
        assert!(emails[0].confirmed_at.is_some());
        assert!(emails[1].confirmed_at.is_none());
    }

    #[test]
    fn test_client_construction() {
        let client = GitLabClient::new("https://gitlab.example.com/", "glpat-token", 10).unwrap();
        assert_eq!(client.api_url(), "https://gitlab.example.com/api/v4");
    }

    #[test]
    fn test_client_rejects_token_with_newline() {
        let result = GitLabClient::new("https://gitlab.example.com", "bad\ntoken", 0);
        assert!(matches!(result, Err(SourceError::AuthenticationFailed(_))));
    }
}
