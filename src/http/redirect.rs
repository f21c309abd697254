//! Redirect policy
//!
//! After each response the transfer engine asks the policy what to do
//! with it. In follow mode a redirect yields the next request; in manual
//! mode the 3xx is handed to the caller; in error mode it fails the fetch.
//!
//! Method rewriting follows the fetch standard: 303 turns everything but
//! GET/HEAD into GET, 301/302 turn POST into GET, and 307/308 replay the
//! request unchanged.

use super::body::Body;
use super::request::{Request, RequestParts};
use super::session::Scheme;
use super::{Error, Headers, Method, Result, Status};
use std::str::FromStr;
use url::Url;

/// Headers describing a request body, dropped when a redirect turns the
/// request into a GET
const BODY_HEADERS: &[&str] = &[
    "Content-Length",
    "Content-Type",
    "Content-Encoding",
    "Content-Language",
    "Content-Location",
    "Transfer-Encoding",
];

/// Credentials never forwarded to another host
const SENSITIVE_HEADERS: &[&str] = &["Authorization", "WWW-Authenticate", "Cookie", "Cookie2"];

/// What to do with redirect responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    #[default]
    Follow,
    Manual,
    Error,
}

impl RedirectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectMode::Follow => "follow",
            RedirectMode::Manual => "manual",
            RedirectMode::Error => "error",
        }
    }
}

impl FromStr for RedirectMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "follow" => Ok(RedirectMode::Follow),
            "manual" => Ok(RedirectMode::Manual),
            "error" => Ok(RedirectMode::Error),
            _ => Err(Error::InvalidRequest(format!("Invalid redirect mode: {}", s))),
        }
    }
}

/// Outcome of inspecting a response
#[derive(Debug)]
pub enum RedirectAction {
    /// Hand the response to the caller
    Final,
    /// Issue this request next
    Follow(Request),
}

/// Per-fetch redirect state
#[derive(Debug)]
pub struct RedirectPolicy {
    mode: RedirectMode,
    limit: u32,
    followed: u32,
}

impl RedirectPolicy {
    pub fn new(mode: RedirectMode, limit: u32) -> Self {
        RedirectPolicy {
            mode,
            limit,
            followed: 0,
        }
    }

    /// Number of redirects followed so far
    pub fn followed(&self) -> u32 {
        self.followed
    }

    /// Decide what to do with a response to the request described by
    /// `parts`
    ///
    /// `replay` is a fresh copy of the request body when it could be
    /// copied; `streamed` is true when the request had a body that cannot
    /// be sent twice. In manual mode a resolvable `Location` in `headers`
    /// is rewritten to the absolute URL; in error mode the error carries
    /// that URL (or the raw header value when it does not resolve).
    pub fn decide(
        &mut self,
        parts: &RequestParts,
        replay: Option<Body>,
        streamed: bool,
        status: Status,
        headers: &mut Headers,
    ) -> Result<RedirectAction> {
        if !status.is_followable_redirect() {
            return Ok(RedirectAction::Final);
        }
        let Some(location) = headers.get_first("Location").map(str::to_string) else {
            return Ok(RedirectAction::Final);
        };

        match self.mode {
            RedirectMode::Error => {
                self.not_followed(status, &parts.url, &location);
                let location = match parts.url.join(&location) {
                    Ok(resolved) => resolved.to_string(),
                    Err(_) => location,
                };
                Err(Error::RedirectNotAllowed {
                    status: status.code(),
                    url: parts.url.to_string(),
                    location,
                })
            }
            RedirectMode::Manual => {
                self.not_followed(status, &parts.url, &location);
                if let Ok(resolved) = parts.url.join(&location) {
                    headers.set("Location", resolved.as_str())?;
                }
                Ok(RedirectAction::Final)
            }
            RedirectMode::Follow => self.follow(parts, replay, streamed, status, &location),
        }
    }

    fn follow(
        &mut self,
        parts: &RequestParts,
        replay: Option<Body>,
        streamed: bool,
        status: Status,
        location: &str,
    ) -> Result<RedirectAction> {
        let target = parts.url.join(location).map_err(|e| Error::InvalidRedirectUrl {
            location: location.to_string(),
            reason: e.to_string(),
        })?;

        if self.followed >= self.limit {
            return Err(Error::TooManyRedirects {
                limit: self.limit,
                url: parts.url.to_string(),
            });
        }

        if Scheme::parse(target.scheme()).is_err() {
            return Err(Error::InvalidRedirectUrl {
                location: location.to_string(),
                reason: format!("unsupported scheme {}", target.scheme()),
            });
        }

        let mut next = parts.clone();
        let switch_to_get = match status.code() {
            303 => !matches!(parts.method, Method::Get | Method::Head),
            301 | 302 => parts.method == Method::Post,
            _ => false,
        };

        let body = if switch_to_get {
            next.method = Method::Get;
            for name in BODY_HEADERS {
                next.headers.delete(name);
            }
            None
        } else if streamed {
            return Err(Error::UnsupportedRedirect {
                status: status.code(),
            });
        } else {
            replay
        };

        if !is_same_site(&parts.url, &target) {
            for name in SENSITIVE_HEADERS {
                next.headers.delete(name);
            }
        }

        tracing::debug!(
            "following {} redirect from {} to {} as {}",
            status.code(),
            parts.url,
            target,
            next.method
        );

        next.url = target;
        self.followed += 1;
        Ok(RedirectAction::Follow(Request::from_parts(next, body)?))
    }

    fn not_followed(&self, status: Status, url: &Url, location: &str) {
        tracing::debug!(
            "{} redirect from {} to {:?} not followed ({} mode)",
            status.code(),
            url,
            location,
            self.mode.as_str()
        );
    }
}

/// Credentials may follow a redirect to the same host or one of its
/// subdomains, as long as the scheme is unchanged
fn is_same_site(original: &Url, target: &Url) -> bool {
    if original.scheme() != target.scheme() {
        return false;
    }
    match (original.host_str(), target.host_str()) {
        (Some(orig), Some(dest)) => {
            let orig = orig.to_ascii_lowercase();
            let dest = dest.to_ascii_lowercase();
            dest == orig || dest.ends_with(&format!(".{}", orig))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(method: Method, url: &str) -> RequestParts {
        Request::builder(url)
            .method(method)
            .build()
            .unwrap()
            .into_parts()
            .0
    }

    fn location(value: &str) -> Headers {
        let mut headers = Headers::new();
        headers.set("Location", value).unwrap();
        headers
    }

    fn status(code: u16) -> Status {
        Status::new(code).unwrap()
    }

    fn follow_once(
        policy: &mut RedirectPolicy,
        parts: &RequestParts,
        body: Option<Body>,
        code: u16,
    ) -> Result<Request> {
        match policy.decide(parts, body, false, status(code), &mut location("/next"))? {
            RedirectAction::Follow(request) => Ok(request),
            RedirectAction::Final => panic!("expected a redirect"),
        }
    }

    #[test]
    fn test_non_redirects_are_final() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let p = parts(Method::Get, "http://x/");

        let action = policy
            .decide(&p, None, false, status(200), &mut location("/a"))
            .unwrap();
        assert!(matches!(action, RedirectAction::Final));

        // 304 and redirects without Location are final as well
        let action = policy
            .decide(&p, None, false, status(304), &mut location("/a"))
            .unwrap();
        assert!(matches!(action, RedirectAction::Final));
        let action = policy
            .decide(&p, None, false, status(302), &mut Headers::new())
            .unwrap();
        assert!(matches!(action, RedirectAction::Final));
        assert_eq!(policy.followed(), 0);
    }

    #[test]
    fn test_relative_location_resolves() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let p = parts(Method::Get, "http://x/dir/page?q=1");
        let next = follow_once(&mut policy, &p, None, 301).unwrap();
        assert_eq!(next.url().as_str(), "http://x/next");
        assert_eq!(policy.followed(), 1);
    }

    #[test]
    fn test_303_turns_post_into_get() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let mut p = parts(Method::Post, "http://x/form");
        p.headers.set("Content-Type", "application/json").unwrap();
        p.headers.set("X-Keep", "1").unwrap();

        let next = follow_once(&mut policy, &p, Some(Body::from("{}")), 303).unwrap();
        assert_eq!(next.method(), Method::Get);
        assert!(next.body().is_none());
        assert!(!next.headers().has("content-type"));
        assert!(next.headers().has("x-keep"));
    }

    #[test]
    fn test_303_keeps_head() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let p = parts(Method::Head, "http://x/");
        let next = follow_once(&mut policy, &p, None, 303).unwrap();
        assert_eq!(next.method(), Method::Head);
    }

    #[test]
    fn test_301_302_only_rewrite_post() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let post = parts(Method::Post, "http://x/");
        let next = follow_once(&mut policy, &post, Some(Body::from("a")), 302).unwrap();
        assert_eq!(next.method(), Method::Get);

        let put = parts(Method::Put, "http://x/");
        let next = follow_once(&mut policy, &put, Some(Body::from("a")), 301).unwrap();
        assert_eq!(next.method(), Method::Put);
        assert!(next.body().is_some());
    }

    #[test]
    fn test_307_preserves_method_and_body() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let p = parts(Method::Post, "http://x/");
        let mut next = follow_once(&mut policy, &p, Some(Body::from("data")), 307)
            .unwrap()
            .into_parts();
        assert_eq!(next.0.method, Method::Post);
        assert_eq!(next.1.as_mut().unwrap().text().unwrap(), "data");
    }

    #[test]
    fn test_streamed_body_cannot_replay() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let p = parts(Method::Post, "http://x/");
        let result = policy.decide(&p, None, true, status(308), &mut location("/n"));
        assert!(matches!(
            result,
            Err(Error::UnsupportedRedirect { status: 308 })
        ));

        // A 303 drops the body, so streaming is irrelevant
        let result = policy.decide(&p, None, true, status(303), &mut location("/n"));
        assert!(matches!(result, Ok(RedirectAction::Follow(_))));
    }

    #[test]
    fn test_follow_limit() {
        let p = parts(Method::Get, "http://x/");
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 2);
        assert!(follow_once(&mut policy, &p, None, 302).is_ok());
        assert!(follow_once(&mut policy, &p, None, 302).is_ok());
        assert!(matches!(
            follow_once(&mut policy, &p, None, 302),
            Err(Error::TooManyRedirects { limit: 2, .. })
        ));

        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 0);
        assert!(matches!(
            follow_once(&mut policy, &p, None, 301),
            Err(Error::TooManyRedirects { limit: 0, .. })
        ));
    }

    #[test]
    fn test_bad_locations() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let p = parts(Method::Get, "http://x/");
        assert!(matches!(
            policy.decide(&p, None, false, status(302), &mut location("http://[bad")),
            Err(Error::InvalidRedirectUrl { .. })
        ));
        assert!(matches!(
            policy.decide(&p, None, false, status(302), &mut location("ftp://x/file")),
            Err(Error::InvalidRedirectUrl { .. })
        ));
    }

    #[test]
    fn test_credentials_stripped_across_hosts() {
        let mut policy = RedirectPolicy::new(RedirectMode::Follow, 20);
        let mut p = parts(Method::Get, "http://example.com/");
        p.headers.set("Authorization", "Bearer t").unwrap();
        p.headers.set("Cookie", "a=b").unwrap();

        let action = policy
            .decide(&p, None, false, status(302), &mut location("http://api.example.com/"))
            .unwrap();
        let RedirectAction::Follow(sub) = action else {
            panic!("expected a redirect")
        };
        assert!(sub.headers().has("authorization"));

        let action = policy
            .decide(&p, None, false, status(302), &mut location("http://other.org/"))
            .unwrap();
        let RedirectAction::Follow(other) = action else {
            panic!("expected a redirect")
        };
        assert!(!other.headers().has("authorization"));
        assert!(!other.headers().has("cookie"));

        let action = policy
            .decide(&p, None, false, status(302), &mut location("https://example.com/"))
            .unwrap();
        let RedirectAction::Follow(upgraded) = action else {
            panic!("expected a redirect")
        };
        assert!(!upgraded.headers().has("authorization"));
    }

    #[test]
    fn test_manual_mode_rewrites_location() {
        let mut policy = RedirectPolicy::new(RedirectMode::Manual, 20);
        let p = parts(Method::Get, "http://x/a/b");
        let mut headers = location("../c");

        let action = policy
            .decide(&p, None, false, status(302), &mut headers)
            .unwrap();
        assert!(matches!(action, RedirectAction::Final));
        assert_eq!(headers.get_first("Location"), Some("http://x/c"));
        assert_eq!(policy.followed(), 0);
    }

    #[test]
    fn test_error_mode_rejects() {
        let mut policy = RedirectPolicy::new(RedirectMode::Error, 20);
        let p = parts(Method::Get, "http://x/a/b");
        let result = policy.decide(&p, None, false, status(301), &mut location("../n"));
        let Err(Error::RedirectNotAllowed {
            status,
            url,
            location,
        }) = result
        else {
            panic!("expected the redirect to be refused")
        };
        assert_eq!(status, 301);
        assert_eq!(url, "http://x/a/b");
        assert_eq!(location, "http://x/n");
        assert_eq!(policy.followed(), 0);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Manual".parse::<RedirectMode>().unwrap(), RedirectMode::Manual);
        assert!("sometimes".parse::<RedirectMode>().is_err());
    }
}
