use std::sync::Arc;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nkeys::KeyPair;

use natsgate_auth::{
    ClaimsIssuer, EffectivePermissions, IssuerSettings, Permission, SigningIdentity,
    merge_permissions, translate,
};

fn issuer() -> ClaimsIssuer {
    let kp = KeyPair::new_account();
    let identity = SigningIdentity::from_secrets(&kp.public_key(), &kp.seed().unwrap()).unwrap();
    ClaimsIssuer::new(Arc::new(identity), IssuerSettings::default())
}

fn permissions(count: usize) -> Vec<Permission> {
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                Permission::publish(&format!("app.room.{i}"))
            } else {
                Permission::subscribe(&format!("app.room.{i}.>"))
            }
        })
        .collect()
}

/// Signing cost of the two artifacts produced per granted call.
fn bench_issue_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("issue_latency");
    let issuer = issuer();
    let acl = translate(&EffectivePermissions {
        permissions: permissions(16),
        groups: Vec::new(),
    });

    group.bench_function("user_credential", |b| {
        b.iter(|| {
            issuer
                .issue_user("UCLIENT", "u-1", black_box(&acl), Utc::now().timestamp())
                .unwrap()
        });
    });

    group.bench_function("user_credential_and_envelope", |b| {
        b.iter(|| {
            let now = Utc::now().timestamp();
            let user_jwt = issuer.issue_user("UCLIENT", "u-1", black_box(&acl), now).unwrap();
            issuer.issue_grant("NSRV", "UCLIENT", user_jwt, now).unwrap()
        });
    });

    group.finish();
}

/// Merge and translation as the permission set grows.
fn bench_resolution_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution_scaling");

    for count in [8usize, 64, 512] {
        let individual = permissions(count);
        let groups = vec![permissions(count / 2), permissions(count)];
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("merge_and_translate", count), &count, |b, _| {
            b.iter(|| {
                let merged =
                    merge_permissions(black_box(individual.clone()), black_box(groups.clone()));
                translate(&EffectivePermissions {
                    permissions: merged,
                    groups: Vec::new(),
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_issue_latency, bench_resolution_scaling);
criterion_main!(benches);
