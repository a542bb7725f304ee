//! Benchmarks for the hot paths of the authentication handshake.
//!
//! Run with: `cargo bench --bench handshake_bench`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use pgwire_broker_auth::auth::md5::postgres_md5_hash;
use pgwire_broker_auth::auth::scram::{
    ScramSession, derive_client_proof, derive_server_signature, hi_sha256,
};
use pgwire_broker_auth::protocol::messages::{parse_auth_request, parse_error_response};

/// Generate a realistic error response payload
fn make_error_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"SFATAL\0");
    payload.extend_from_slice(b"VFATAL\0");
    payload.extend_from_slice(b"C28P01\0");
    payload.extend_from_slice(b"Mpassword authentication failed for user \"app\"\0");
    payload.extend_from_slice(b"Fauth.c\0");
    payload.extend_from_slice(b"L335\0");
    payload.extend_from_slice(b"Rauth_failed\0");
    payload.push(0);
    payload
}

fn bench_parse_auth_request(c: &mut Criterion) {
    let mut payload = 10i32.to_be_bytes().to_vec();
    payload.extend_from_slice(b"SCRAM-SHA-256\0SCRAM-SHA-256-PLUS\0\0");

    c.bench_function("parse_auth_request", |b| {
        b.iter(|| parse_auth_request(black_box(&payload)));
    });
}

fn bench_parse_error_response(c: &mut Criterion) {
    let payload = make_error_payload();

    c.bench_function("parse_error_response", |b| {
        b.iter(|| parse_error_response(black_box(&payload)));
    });
}

fn bench_scram_transcript(c: &mut Criterion) {
    let session = ScramSession::new("app");
    let server_first = format!(
        "r={}3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096",
        session.client_nonce_b64
    );

    c.bench_function("scram_transcript", |b| {
        b.iter(|| session.transcript(black_box(&server_first)));
    });
}

fn bench_hi_sha256(c: &mut Criterion) {
    let mut group = c.benchmark_group("hi_sha256");
    group.sample_size(10);

    for iters in [4096u32, 15000] {
        group.bench_with_input(BenchmarkId::from_parameter(iters), &iters, |b, &iters| {
            b.iter(|| hi_sha256(black_box(b"pencil"), black_box(b"QSXCR+Q6sek8bf92"), iters));
        });
    }

    group.finish();
}

fn bench_proof_derivation(c: &mut Criterion) {
    let salted = hi_sha256(b"pencil", b"QSXCR+Q6sek8bf92", 4096);
    let auth_message = "n=app,r=abc,r=abcdef,s=QSXCR+Q6sek8bf92,i=4096,c=biws,r=abcdef";

    c.bench_function("derive_client_proof", |b| {
        b.iter(|| derive_client_proof(black_box(&salted), black_box(auth_message)));
    });

    c.bench_function("derive_server_signature", |b| {
        b.iter(|| derive_server_signature(black_box(&salted), black_box(auth_message)));
    });
}

fn bench_md5_hash(c: &mut Criterion) {
    c.bench_function("postgres_md5_hash", |b| {
        b.iter(|| {
            postgres_md5_hash(
                black_box("secret"),
                black_box("app"),
                black_box(&[1, 2, 3, 4]),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_parse_auth_request,
    bench_parse_error_response,
    bench_scram_transcript,
    bench_hi_sha256,
    bench_proof_derivation,
    bench_md5_hash,
);
criterion_main!(benches);
