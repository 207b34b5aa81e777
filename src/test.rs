#![allow(clippy::trivial_regex)]

use std::{
    convert::Infallible,
    future::ready,
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        OnceLock,
    },
};

use actix_http::{HttpService, Method, Request, Response, StatusCode};
use actix_server::{Server, ServerHandle};
use actix_web::body::MessageBody;
use regex::Regex;

static RE_URL: OnceLock<Regex> = OnceLock::new();
static NONCE_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn re_url() -> &'static Regex {
    RE_URL.get_or_init(|| Regex::new("<URL>").unwrap())
}

fn next_nonce() -> String {
    let n = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-nonce-{n}")
}

pub(crate) struct TestServer {
    pub(crate) url: String,
    pub(crate) dir_url: String,
    handle: ServerHandle,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        drop(self.handle.stop(false));
    }
}

/// Self-signed PEM chain covering `names`, for certificate endpoints and
/// parser tests.
pub(crate) fn cert_chain_pem_for(names: &[&str]) -> String {
    let names: Vec<String> = names.iter().map(|name| (*name).to_owned()).collect();
    let certified = rcgen::generate_simple_self_signed(names).unwrap();
    certified.cert.pem()
}

fn json_response(status: StatusCode, body: String) -> Response<impl MessageBody> {
    Response::build(status)
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Replay-Nonce", next_nonce()))
        .body(body)
}

fn get_directory(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "keyChange": "<URL>/acme/key-change",
    "newAccount": "<URL>/acme/new-acct",
    "newNonce": "<URL>/acme/new-nonce",
    "newOrder": "<URL>/acme/new-order",
    "revokeCert": "<URL>/acme/revoke-cert",
    "meta": {
        "caaIdentities": [
        "testdir.org"
        ]
    }
    }"#;

    json_response(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

// Alternate directory whose newOrder endpoint omits the Location header.
fn get_directory_sloppy(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "newAccount": "<URL>/acme/new-acct",
    "newNonce": "<URL>/acme/new-nonce",
    "newOrder": "<URL>/acme/new-order-no-location"
    }"#;

    json_response(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

fn head_new_nonce() -> Response<impl MessageBody> {
    Response::build(StatusCode::NO_CONTENT)
        .insert_header(("Replay-Nonce", next_nonce()))
        .finish()
}

fn post_new_acct(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "key": {
        "use": "sig",
        "kty": "EC",
        "crv": "P-384",
        "alg": "ES384",
        "x": "ttpobTRK2bw7ttGBESRO7Nb23mbIRfnRZwunL1W6wRI",
        "y": "h2Z00J37_2qRKH0-flrHEsH0xbit915Tyvd2v_CAOSk"
    },
    "contact": [
        "mailto:tester@example.com"
    ],
    "status": "valid"
    }"#;

    let location = re_url().replace_all("<URL>/acme/acct/1", url).into_owned();

    Response::build(StatusCode::CREATED)
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Location", location))
        .insert_header(("Replay-Nonce", next_nonce()))
        .body(BODY)
}

fn post_acct(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "contact": [
        "mailto:tester@example.com"
    ],
    "status": "valid",
    "orders": "<URL>/acme/acct/1/orders"
    }"#;

    json_response(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

fn post_new_order(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "status": "pending",
    "expires": "2999-01-09T08:26:43Z",
    "identifiers": [
        {
        "type": "dns",
        "value": "acme-test.example.com"
        }
    ],
    "authorizations": [
        "<URL>/acme/authz/a1",
        "<URL>/acme/authz/a2"
    ],
    "finalize": "<URL>/acme/finalize/1001"
    }"#;

    let location = re_url()
        .replace_all("<URL>/acme/order/1001", url)
        .into_owned();

    Response::build(StatusCode::CREATED)
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Location", location))
        .insert_header(("Replay-Nonce", next_nonce()))
        .body(re_url().replace_all(BODY, url).into_owned())
}

fn post_new_order_no_location(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "status": "pending",
    "identifiers": [
        {
        "type": "dns",
        "value": "acme-test.example.com"
        }
    ]
    }"#;

    json_response(
        StatusCode::CREATED,
        re_url().replace_all(BODY, url).into_owned(),
    )
}

// A finalize endpoint that answers with a Location header and a JSON array
// body, which cannot carry a location key.
fn post_finalize_array(url: &str) -> Response<impl MessageBody> {
    let location = re_url()
        .replace_all("<URL>/acme/order/1001", url)
        .into_owned();

    Response::build(StatusCode::OK)
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Location", location))
        .insert_header(("Replay-Nonce", next_nonce()))
        .body("[]")
}

fn post_get_order(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "status": "ready",
    "expires": "2999-01-09T08:26:43Z",
    "identifiers": [
        {
        "type": "dns",
        "value": "acme-test.example.com"
        }
    ],
    "authorizations": [
        "<URL>/acme/authz/a1",
        "<URL>/acme/authz/a2"
    ],
    "finalize": "<URL>/acme/finalize/1001"
    }"#;

    json_response(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

// An order that never leaves `processing`; its body carries its own poll
// location so refreshing it loops forever.
fn post_stuck_order(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "status": "processing",
    "expires": "2999-01-09T08:26:43Z",
    "identifiers": [
        {
        "type": "dns",
        "value": "acme-test.example.com"
        }
    ],
    "location": "<URL>/acme/order/stuck"
    }"#;

    json_response(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

fn post_authz_plain(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "identifier": {
        "type": "dns",
        "value": "acme-test.example.com"
    },
    "status": "pending",
    "expires": "2999-01-09T08:26:43Z",
    "challenges": [
        {
        "type": "http-01",
        "status": "pending",
        "url": "<URL>/acme/challenge/a1/1",
        "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
        },
        {
        "type": "tls-alpn-01",
        "status": "pending",
        "url": "<URL>/acme/challenge/a1/2",
        "token": "WCdRWkCy4THTD_j5IH4ISAzr59lFIg5wzYmKxuOJ1lU"
        },
        {
        "type": "dns-01",
        "status": "pending",
        "url": "<URL>/acme/challenge/a1/3",
        "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
        }
    ]
    }"#;

    json_response(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

fn post_authz_wildcard(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "identifier": {
        "type": "dns",
        "value": "acme-test.example.com"
    },
    "status": "pending",
    "expires": "2999-01-09T08:26:43Z",
    "wildcard": true,
    "challenges": [
        {
        "type": "dns-01",
        "status": "pending",
        "url": "<URL>/acme/challenge/a2/1",
        "token": "a8c7jsnWkcPMrvq3efV0tSyMyQLMGVtQ"
        }
    ]
    }"#;

    json_response(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

fn post_challenge(url: &str, path: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "type": "http-01",
    "status": "valid",
    "url": "<URL><PATH>",
    "validated": "2999-01-09T08:26:43Z",
    "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
    }"#;

    let body = re_url()
        .replace_all(BODY, url)
        .replace("<PATH>", path);

    json_response(StatusCode::OK, body)
}

fn post_finalize(url: &str) -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "status": "valid",
    "expires": "2999-01-09T08:26:43Z",
    "identifiers": [
        {
        "type": "dns",
        "value": "acme-test.example.com"
        }
    ],
    "authorizations": [
        "<URL>/acme/authz/a1",
        "<URL>/acme/authz/a2"
    ],
    "finalize": "<URL>/acme/finalize/1001",
    "certificate": "<URL>/acme/cert/1"
    }"#;

    json_response(StatusCode::OK, re_url().replace_all(BODY, url).into_owned())
}

fn post_certificate(cert_pem: &str) -> Response<impl MessageBody> {
    Response::build(StatusCode::OK)
        .insert_header(("Content-Type", "application/pem-certificate-chain"))
        .insert_header(("Replay-Nonce", next_nonce()))
        .body(cert_pem.to_owned())
}

fn post_revoke() -> Response<impl MessageBody> {
    Response::build(StatusCode::OK)
        .insert_header(("Replay-Nonce", next_nonce()))
        .finish()
}

fn err_bad_nonce() -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "type": "urn:ietf:params:acme:error:badNonce",
    "detail": "JWS has an invalid anti-replay nonce"
    }"#;

    Response::build(StatusCode::BAD_REQUEST)
        .insert_header(("Content-Type", "application/problem+json"))
        .insert_header(("Replay-Nonce", next_nonce()))
        .body(BODY)
}

fn err_rate_limit() -> Response<impl MessageBody> {
    const BODY: &str = r#"{
    "type": "urn:ietf:params:acme:error:rateLimited",
    "detail": "too many new orders recently"
    }"#;

    Response::build(StatusCode::TOO_MANY_REQUESTS)
        .insert_header(("Content-Type", "application/problem+json"))
        .insert_header(("Retry-After", "120"))
        .body(BODY)
}

fn err_plain() -> Response<impl MessageBody> {
    Response::build(StatusCode::INTERNAL_SERVER_ERROR)
        .insert_header(("Content-Type", "text/plain"))
        .body("database is on fire")
}

fn route_request(req: Request, url: &str, cert_pem: &str) -> Response<impl MessageBody> {
    match (req.method(), req.path()) {
        (&Method::GET, "/directory") => get_directory(url).map_into_boxed_body(),
        (&Method::GET, "/directory-sloppy") => get_directory_sloppy(url).map_into_boxed_body(),
        (&Method::HEAD, "/acme/new-nonce") => head_new_nonce().map_into_boxed_body(),
        (&Method::POST, "/acme/new-acct") => post_new_acct(url).map_into_boxed_body(),
        (&Method::POST, "/acme/acct/1") => post_acct(url).map_into_boxed_body(),
        (&Method::POST, "/acme/new-order") => post_new_order(url).map_into_boxed_body(),
        (&Method::POST, "/acme/new-order-no-location") => {
            post_new_order_no_location(url).map_into_boxed_body()
        }

        (&Method::POST, "/acme/order/1001") => post_get_order(url).map_into_boxed_body(),
        (&Method::POST, "/acme/order/stuck") => post_stuck_order(url).map_into_boxed_body(),

        (&Method::POST, "/acme/authz/a1") => post_authz_plain(url).map_into_boxed_body(),
        (&Method::POST, "/acme/authz/a2") => post_authz_wildcard(url).map_into_boxed_body(),

        (&Method::POST, path) if path.starts_with("/acme/challenge/") => {
            let path = path.to_owned();
            post_challenge(url, &path).map_into_boxed_body()
        }

        (&Method::POST, "/acme/finalize/1001") => post_finalize(url).map_into_boxed_body(),
        (&Method::POST, "/acme/finalize/broken") => post_finalize_array(url).map_into_boxed_body(),
        (&Method::POST, "/acme/cert/1") => post_certificate(cert_pem).map_into_boxed_body(),
        (&Method::POST, "/acme/revoke-cert") => post_revoke().map_into_boxed_body(),

        (_, "/err/bad-nonce") => err_bad_nonce().map_into_boxed_body(),
        (_, "/err/rate-limit") => err_rate_limit().map_into_boxed_body(),
        (_, "/err/plain") => err_plain().map_into_boxed_body(),

        (_, _) => Response::build(StatusCode::NOT_FOUND)
            .finish()
            .map_into_boxed_body(),
    }
}

pub(crate) fn with_directory_server() -> TestServer {
    let lst = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = lst.local_addr().unwrap().port();

    let url = format!("http://127.0.0.1:{port}");
    let dir_url = format!("{url}/directory");

    let cert_pem = cert_chain_pem_for(&["acme-test.example.com"]);

    let server = Server::build()
        .listen("acme", lst, {
            let url = url.clone();
            move || {
                let url = url.clone();
                let cert_pem = cert_pem.clone();

                HttpService::build()
                    .finish(move |req| {
                        ready(Ok::<_, Infallible>(route_request(req, &url, &cert_pem)))
                    })
                    .tcp()
            }
        })
        .unwrap()
        .workers(1)
        .run();

    let handle = server.handle();

    tokio::spawn(server);

    TestServer {
        url,
        dir_url,
        handle,
    }
}

#[tokio::test]
async fn test_make_directory() {
    let server = with_directory_server();
    let res = reqwest::get(&server.dir_url).await.unwrap();
    assert!(res.status().is_success());
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "application/json",
    );
}
