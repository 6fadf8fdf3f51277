//! In-memory S3 stand-in served over HTTP by wiremock
//!
//! Path-style addressing only: `/<bucket>` for bucket operations and
//! `/<bucket>/<key>` for objects. Ranged GETs are answered with 206 and a
//! `Content-Range` header, like the real store.

#![allow(dead_code)]

use s3bench::config::HttpConfig;
use s3bench::s3::{Client, ClientOptions, Credentials, HttpTransport, Region, Scheme};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Default)]
struct State {
    buckets: BTreeSet<String>,
    objects: BTreeMap<(String, String), Vec<u8>>,
}

#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

fn error(status: u16, code: &str) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .insert_header("content-type", "application/xml")
        .set_body_string(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message></Error>",
            code, code
        ))
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl FakeStore {
    pub fn bucket_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().buckets.contains(name)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    pub fn bucket_count(&self) -> usize {
        self.state.lock().unwrap().buckets.len()
    }

    fn get_object(&self, request: &Request, data: &[u8]) -> ResponseTemplate {
        let total = data.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        let Some((start, end)) = range else {
            return ResponseTemplate::new(200).set_body_bytes(data.to_vec());
        };

        if start >= total {
            return error(416, "InvalidRange")
                .insert_header("content-range", format!("bytes */{}", total).as_str());
        }
        let end = end.min(total - 1);
        ResponseTemplate::new(206)
            .insert_header("content-range", format!("bytes {}-{}/{}", start, end, total).as_str())
            .set_body_bytes(data[start as usize..=end as usize].to_vec())
    }
}

impl Respond for FakeStore {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let signed = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("AWS4-HMAC-SHA256 Credential="));
        if !signed {
            return error(403, "AccessDenied");
        }

        let path = request.url.path().trim_start_matches('/');
        let (bucket, key) = match path.split_once('/') {
            Some((bucket, key)) if !key.is_empty() => (bucket.to_string(), Some(key.to_string())),
            Some((bucket, _)) => (bucket.to_string(), None),
            None => (path.to_string(), None),
        };

        let mut state = self.state.lock().unwrap();
        let method = request.method.as_str();

        let Some(key) = key else {
            return match method {
                "PUT" if state.buckets.contains(&bucket) => error(409, "BucketAlreadyOwnedByYou"),
                "PUT" => {
                    state.buckets.insert(bucket);
                    ResponseTemplate::new(200)
                }
                "DELETE" if !state.buckets.contains(&bucket) => error(404, "NoSuchBucket"),
                "DELETE" if state.objects.keys().any(|(b, _)| *b == bucket) => {
                    error(409, "BucketNotEmpty")
                }
                "DELETE" => {
                    state.buckets.remove(&bucket);
                    ResponseTemplate::new(204)
                }
                _ => error(405, "MethodNotAllowed"),
            };
        };

        if !state.buckets.contains(&bucket) {
            return error(404, "NoSuchBucket");
        }

        let id = (bucket, key);
        match method {
            "PUT" => {
                state.objects.insert(id, request.body.clone());
                ResponseTemplate::new(200)
            }
            "GET" => match state.objects.get(&id) {
                Some(data) => self.get_object(request, data),
                None => error(404, "NoSuchKey"),
            },
            "DELETE" => {
                state.objects.remove(&id);
                ResponseTemplate::new(204)
            }
            _ => error(405, "MethodNotAllowed"),
        }
    }
}

/// Start a server backed by a fresh [`FakeStore`]
pub async fn start() -> (MockServer, FakeStore) {
    let server = MockServer::start().await;
    let store = FakeStore::default();
    Mock::given(any())
        .respond_with(store.clone())
        .mount(&server)
        .await;
    (server, store)
}

pub fn region(server: &MockServer, name: &str, constraint: Option<&str>) -> Region {
    Region::new(name, server.address().to_string(), constraint.map(str::to_string))
}

pub fn client() -> Client {
    let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
    let options = ClientOptions {
        scheme: Scheme::Http,
        path_style: true,
        ..ClientOptions::default()
    };
    Client::new(transport, Credentials::new("AKIDEXAMPLE", "SECRETEXAMPLE", None), options)
}
