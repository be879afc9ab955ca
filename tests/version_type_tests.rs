use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shardkeeper::versions::{MATCH_ANY, MATCH_DELETED, NOT_FOUND};
use shardkeeper::{ClusterError, ErrorKind, VersionDecision, VersionType};

fn positive(rng: &mut StdRng) -> i64 {
    rng.gen_range(1..=i32::MAX as i64)
}

fn non_positive(rng: &mut StdRng) -> i64 {
    rng.gen_range(i32::MIN as i64..=0)
}

fn negative(rng: &mut StdRng) -> i64 {
    rng.gen_range(i32::MIN as i64..=-5)
}

#[test]
fn internal_version_conflicts() {
    let internal = VersionType::Internal;
    for deleted in [true, false] {
        assert!(!internal.is_version_conflict_for_writes(10, MATCH_ANY, deleted));
        // Nothing stored: only MATCH_ANY gets through.
        assert!(internal.is_version_conflict_for_writes(NOT_FOUND, 10, deleted));
        assert!(!internal.is_version_conflict_for_writes(NOT_FOUND, MATCH_ANY, deleted));

        assert!(!internal.is_version_conflict_for_writes(10, 10, deleted));
        assert!(internal.is_version_conflict_for_writes(9, 10, deleted));
        assert!(internal.is_version_conflict_for_writes(10, 9, deleted));
    }
    assert!(!internal.is_version_conflict_for_reads(10, MATCH_ANY));
    assert!(internal.is_version_conflict_for_reads(NOT_FOUND, 10));
    assert!(!internal.is_version_conflict_for_reads(NOT_FOUND, MATCH_ANY));
    assert!(!internal.is_version_conflict_for_reads(10, 10));
    assert!(internal.is_version_conflict_for_reads(9, 10));
    assert!(internal.is_version_conflict_for_reads(10, 9));

    assert!(!internal.is_version_conflict_for_writes(NOT_FOUND, MATCH_DELETED, true));
    assert!(!internal.is_version_conflict_for_writes(10, MATCH_DELETED, true));
    assert!(internal.is_version_conflict_for_writes(10, MATCH_DELETED, false));

    assert_eq!(
        internal.explain_conflict_for_reads(1, 2),
        "current version [1] is different than the one provided [2]"
    );
    assert_eq!(
        internal.explain_conflict_for_reads(NOT_FOUND, 2),
        "document does not exist (expected version [2])"
    );
    assert_eq!(
        internal.explain_conflict_for_writes(7, MATCH_DELETED, false),
        "document already exists (current version [7])"
    );
}

#[test]
fn external_version_conflicts() {
    let external = VersionType::External;
    for deleted in [true, false] {
        assert!(!external.is_version_conflict_for_writes(NOT_FOUND, 10, deleted));
        // External writes must carry a version of their own.
        assert!(external.is_version_conflict_for_writes(10, MATCH_ANY, deleted));
        assert!(!external.is_version_conflict_for_writes(NOT_FOUND, NOT_FOUND, deleted));

        assert!(external.is_version_conflict_for_writes(10, 10, deleted));
        assert!(!external.is_version_conflict_for_writes(9, 10, deleted));
        assert!(external.is_version_conflict_for_writes(10, 9, deleted));
    }

    assert!(external.is_version_conflict_for_reads(NOT_FOUND, NOT_FOUND));
    assert!(external.is_version_conflict_for_reads(NOT_FOUND, 10));
    assert!(!external.is_version_conflict_for_reads(NOT_FOUND, MATCH_ANY));
    assert!(!external.is_version_conflict_for_reads(10, 10));
    assert!(external.is_version_conflict_for_reads(9, 10));
    assert!(external.is_version_conflict_for_reads(10, 9));
    assert!(!external.is_version_conflict_for_reads(10, MATCH_ANY));
}

#[test]
fn external_gte_version_conflicts() {
    let external_gte = VersionType::ExternalGte;
    for deleted in [true, false] {
        assert!(!external_gte.is_version_conflict_for_writes(NOT_FOUND, 10, deleted));
        assert!(external_gte.is_version_conflict_for_writes(10, MATCH_ANY, deleted));
        assert!(!external_gte.is_version_conflict_for_writes(NOT_FOUND, NOT_FOUND, deleted));

        assert!(!external_gte.is_version_conflict_for_writes(10, 10, deleted));
        assert!(!external_gte.is_version_conflict_for_writes(9, 10, deleted));
        assert!(external_gte.is_version_conflict_for_writes(10, 9, deleted));
    }

    assert!(external_gte.is_version_conflict_for_reads(NOT_FOUND, NOT_FOUND));
    assert!(external_gte.is_version_conflict_for_reads(NOT_FOUND, 10));
    assert!(!external_gte.is_version_conflict_for_reads(NOT_FOUND, MATCH_ANY));
    assert!(!external_gte.is_version_conflict_for_reads(10, 10));
    assert!(external_gte.is_version_conflict_for_reads(9, 10));
    assert!(external_gte.is_version_conflict_for_reads(10, 9));
    assert!(!external_gte.is_version_conflict_for_reads(10, MATCH_ANY));
}

#[test]
fn version_validation() {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..50 {
        for external in [VersionType::External, VersionType::ExternalGte] {
            assert!(external.validate_version_for_writes(positive(&mut rng)));
            assert!(!external.validate_version_for_writes(MATCH_ANY));
            assert!(!external.validate_version_for_writes(non_positive(&mut rng)));
            assert!(external.validate_version_for_reads(MATCH_ANY));
            assert!(external.validate_version_for_reads(positive(&mut rng)));
            assert!(!external.validate_version_for_reads(negative(&mut rng)));
        }

        let internal = VersionType::Internal;
        assert!(internal.validate_version_for_writes(positive(&mut rng)));
        assert!(internal.validate_version_for_writes(MATCH_ANY));
        assert!(internal.validate_version_for_reads(MATCH_ANY));
        assert!(internal.validate_version_for_reads(positive(&mut rng)));
        assert!(!internal.validate_version_for_reads(negative(&mut rng)));
    }

    // Internal writes accept any non-negative version, zero included.
    assert!(VersionType::Internal.validate_version_for_writes(0));
    assert!(!VersionType::Internal.validate_version_for_writes(NOT_FOUND));
    assert!(!VersionType::Internal.validate_version_for_writes(-17));

    for version_type in VersionType::ALL {
        assert_eq!(
            version_type.explain_conflict_for_reads(1, 2),
            "current version [1] is different than the one provided [2]"
        );
        assert_eq!(
            version_type.explain_conflict_for_reads(NOT_FOUND, 2),
            "document does not exist (expected version [2])"
        );
    }
}

#[test]
fn update_version() {
    assert_eq!(VersionType::Internal.update_version(NOT_FOUND, 10), 1);
    assert_eq!(VersionType::Internal.update_version(1, 1), 2);
    assert_eq!(VersionType::Internal.update_version(2, MATCH_ANY), 3);

    assert_eq!(VersionType::External.update_version(NOT_FOUND, 10), 10);
    assert_eq!(VersionType::External.update_version(1, 10), 10);

    assert_eq!(VersionType::ExternalGte.update_version(NOT_FOUND, 10), 10);
    assert_eq!(VersionType::ExternalGte.update_version(1, 10), 10);
    assert_eq!(VersionType::ExternalGte.update_version(10, 10), 10);
}

#[test]
fn equal_external_versions_split_the_strategies() {
    assert_eq!(
        VersionType::External.evaluate(10, 10, false),
        VersionDecision::Conflict {
            current: 10,
            expected: 10,
            message: "current version [10] is different than the one provided [10]".to_string(),
        }
    );
    assert_eq!(
        VersionType::ExternalGte.evaluate(10, 10, false),
        VersionDecision::Accept { next_version: 10 }
    );
}

#[test]
fn check_write_surfaces_conflicts_verbatim() {
    assert_eq!(VersionType::Internal.check_write(MATCH_ANY, NOT_FOUND, false), Ok(1));
    assert_eq!(VersionType::Internal.check_write(3, 3, false), Ok(4));
    assert_eq!(VersionType::Internal.check_write(MATCH_DELETED, 3, true), Ok(4));

    let err = VersionType::Internal.check_write(3, NOT_FOUND, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionConflict);
    assert_eq!(
        err,
        ClusterError::VersionConflict {
            current: NOT_FOUND,
            expected: 3,
            message: "document does not exist (expected version [3])".to_string(),
        }
    );

    let err = VersionType::External.check_write(MATCH_ANY, 4, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.to_string(),
        "Validation error: illegal version value [-3] for version type [external]"
    );

    assert_eq!(VersionType::External.check_write(12, 4, false), Ok(12));
}

#[test]
fn check_read_uses_the_shared_rule() {
    for version_type in VersionType::ALL {
        assert_eq!(version_type.check_read(MATCH_ANY, NOT_FOUND), Ok(()));
        assert_eq!(version_type.check_read(5, 5), Ok(()));
        let err = version_type.check_read(4, 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionConflict);
        assert!(version_type.check_read(-9, 5).is_err());
    }
}

#[test]
fn version_type_names() {
    assert_eq!("external_gte".parse::<VersionType>(), Ok(VersionType::ExternalGte));
    assert_eq!(VersionType::External.to_string(), "external");
    let err = "force".parse::<VersionType>().unwrap_err();
    assert_eq!(err.to_string(), "Validation error: no version type match [force]");

    let json = serde_json::to_string(&VersionType::ExternalGte).unwrap();
    assert_eq!(json, "\"external_gte\"");
    let decision = serde_json::to_value(VersionDecision::Accept { next_version: 3 }).unwrap();
    assert_eq!(decision["decision"], "accept");
    assert_eq!(decision["next_version"], 3);
}
