mod common;

use bytes::Bytes;
use hyper::StatusCode;
use s3bench::bench::random_payload;
use s3bench::s3::{Acl, CreateOutcome, Error, FetchError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Full object lifecycle against the fake store
#[tokio::test]
async fn test_object_lifecycle() {
    let (server, store) = common::start().await;
    let client = common::client();
    let bucket = client.bucket("s3-bench-test-1", &common::region(&server, "eu-west-1", Some("eu-west-1")));

    assert_eq!(bucket.create().await.unwrap(), CreateOutcome::Created);
    assert!(store.bucket_exists("s3-bench-test-1"));

    let payload = random_payload(256 * 1024 + 17);
    bucket.put("random.dat", payload.clone(), Acl::PublicRead).await.unwrap();
    assert_eq!(store.object("s3-bench-test-1", "random.dat").unwrap(), payload.to_vec());

    let serial = bucket.get("random.dat").await.unwrap().collect().await.unwrap();
    assert_eq!(serial, payload);

    bucket.delete(&["random.dat"]).await.unwrap();
    bucket.delete_bucket().await.unwrap();
    assert_eq!(store.bucket_count(), 0);
}

/// Parallel reassembly equals a serial GET for many worker counts
#[tokio::test]
async fn test_multi_get_matches_serial_get() {
    let (server, _store) = common::start().await;
    let client = common::client();
    let bucket = client.bucket("multi", &common::region(&server, "us-east-1", None));
    bucket.create().await.unwrap();

    for len in [1usize, 3, 1000, 65_537] {
        let payload = random_payload(len);
        bucket.put("random.dat", payload.clone(), Acl::Private).await.unwrap();
        let serial = bucket.get("random.dat").await.unwrap().collect().await.unwrap();

        for workers in [1, 2, 3, 4, 7, 16] {
            let parallel = bucket
                .multi_get("random.dat", workers)
                .await
                .unwrap()
                .collect()
                .await
                .unwrap();
            assert_eq!(parallel, serial, "len={} workers={}", len, workers);
        }
    }
}

#[tokio::test]
async fn test_multi_get_empty_object() {
    let (server, _store) = common::start().await;
    let client = common::client();
    let bucket = client.bucket("empty", &common::region(&server, "us-east-1", None));
    bucket.create().await.unwrap();
    bucket.put("empty.dat", Bytes::new(), Acl::Private).await.unwrap();

    let stream = bucket.multi_get("empty.dat", 4).await.unwrap();
    assert!(stream.collect().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_multi_get_missing_object_fails_length_request() {
    let (server, _store) = common::start().await;
    let client = common::client();
    let bucket = client.bucket("missing", &common::region(&server, "us-east-1", None));
    bucket.create().await.unwrap();

    let err = bucket.multi_get("nope.dat", 4).await.unwrap_err();
    assert!(matches!(err, Error::Fetch(FetchError::LengthRequest { .. })));
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_create_existing_bucket_is_already_exists() {
    let (server, _store) = common::start().await;
    let client = common::client();
    let bucket = client.bucket("twice", &common::region(&server, "us-east-1", None));

    assert_eq!(bucket.create().await.unwrap(), CreateOutcome::Created);
    assert_eq!(bucket.create().await.unwrap(), CreateOutcome::AlreadyExists);
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let (server, _store) = common::start().await;
    let client = common::client();
    let bucket = client.bucket("missing", &common::region(&server, "us-east-1", None));
    bucket.create().await.unwrap();

    match bucket.get("random.dat").await.unwrap_err() {
        Error::Bucket(err) => {
            assert_eq!(err.status, StatusCode::NOT_FOUND);
            assert_eq!(err.code.as_deref(), Some("NoSuchKey"));
            assert!(err.to_string().contains("/missing/random.dat"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Every operation reports the exact status the store answered with
#[tokio::test]
async fn test_status_codes_are_preserved() {
    for status in [400u16, 403, 404, 500, 503] {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        Mock::given(path("/b/k"))
            .respond_with(ResponseTemplate::new(status).set_body_string("<Error><Code>Injected</Code></Error>"))
            .mount(&server)
            .await;

        let client = common::client();
        let bucket = client.bucket("b", &common::region(&server, "us-east-1", None));
        let expected = Some(StatusCode::from_u16(status).unwrap());

        assert_eq!(bucket.create().await.unwrap_err().status(), expected);
        assert_eq!(
            bucket.put("k", Bytes::from_static(b"x"), Acl::Private).await.unwrap_err().status(),
            expected
        );
        assert_eq!(bucket.get("k").await.unwrap_err().status(), expected);
        assert_eq!(bucket.delete(&["k"]).await.unwrap_err().status(), expected);
    }
}
