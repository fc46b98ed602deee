//! End-to-end replay scenarios against an in-memory TFVC server and the
//! real git binary.

mod common;

use common::*;
use tfvc2git::tfvc::ChangeType;

#[test]
fn linear_add_edit_delete() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add a", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "A1");
    fake.changeset(2, "Jane Dev", "edit a", vec![file("$/P/a.txt", ChangeType::EDIT)]);
    fake.content("$/P/a.txt", 2, "A2");
    fake.changeset(3, "Jane Dev", "delete a", vec![file("$/P/a.txt", ChangeType::DELETE)]);

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    assert_eq!(
        subjects(&main),
        vec!["delete a [CVCS-3]", "edit a [CVCS-2]", "add a [CVCS-1]"]
    );
    assert_eq!(blob(&main, "HEAD~2:a.txt"), "A1");
    assert_eq!(blob(&main, "HEAD~1:a.txt"), "A2");
    assert!(tracked_files(&main).is_empty());
}

#[test]
fn commits_carry_changeset_author_and_dates() {
    let mut fake = FakeTfvc::new();
    fake.changeset(
        1,
        "Jane Q Dev",
        "first",
        vec![file("$/P/a.txt", ChangeType::ADD)],
    );
    fake.content("$/P/a.txt", 1, "A1");

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    let line = git(&main, &["log", "--format=%an|%ae|%cn|%ce|%aI|%cI", "-1"]);
    assert_eq!(
        line.trim(),
        "Jane Q Dev|Jane.Q.Dev|Jane Q Dev|Jane.Q.Dev|\
         2016-07-13T12:01:00+02:00|2016-07-13T12:01:00+02:00"
    );
}

#[test]
fn branch_creation_from_primary() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add a", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "X");
    fake.branch_object("$/P/feat", 2);
    fake.changeset(
        2,
        "Jane Dev",
        "branch feat",
        vec![sourced(
            file("$/P/feat/a.txt", ChangeType::BRANCH),
            "$/P/a.txt",
            1,
            1,
        )],
    );

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    let feat = out.path().join("feat");
    assert_eq!(subjects(&feat), vec!["branch feat [CVCS-2]"]);
    assert_eq!(blob(&feat, "HEAD:a.txt"), "X");

    // The hash tracker records exactly the branch heads.
    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("laststate.json")).unwrap())
            .unwrap();
    assert_eq!(state["hashTracker"]["main"]["1"], head_hash(&main));
    assert_eq!(state["hashTracker"]["feat"]["2"], head_hash(&feat));
    assert_eq!(state["processingCid"], 3);
}

#[test]
fn rename_before_add_collision() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add a", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "OLD");
    fake.changeset(
        2,
        "Jane Dev",
        "rename and re-add",
        vec![
            file("$/P/a.txt", ChangeType::ADD),
            sourced(file("$/P/b.txt", ChangeType::RENAME), "$/P/a.txt", 1, 1),
        ],
    );
    fake.content("$/P/a.txt", 2, "NEW");
    fake.content("$/P/b.txt", 2, "OLD");

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    assert_eq!(blob(&main, "HEAD:b.txt"), "OLD");
    assert_eq!(blob(&main, "HEAD:a.txt"), "NEW");
}

#[test]
fn pure_rename_moves_the_file() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add a", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "OLD");
    fake.changeset(
        2,
        "Jane Dev",
        "rename a to b",
        vec![
            sourced(file("$/P/b.txt", ChangeType::RENAME), "$/P/a.txt", 1, 1),
            // the old path's half of the rename, a declared no-op
            file("$/P/a.txt", ChangeType::DELETE | ChangeType::SOURCE_RENAME),
        ],
    );
    fake.content("$/P/b.txt", 2, "OLD");

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    assert_eq!(tracked_files(&main), vec!["b.txt"]);
    // Rename with no edit: content is byte-identical to the source commit.
    assert_eq!(blob(&main, "HEAD:b.txt"), blob(&main, "HEAD~1:a.txt"));
}

#[test]
fn cross_branch_merge_with_edit() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add a", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "X");
    fake.branch_object("$/P/feat", 2);
    fake.changeset(
        2,
        "Jane Dev",
        "branch feat",
        vec![sourced(
            file("$/P/feat/a.txt", ChangeType::BRANCH),
            "$/P/a.txt",
            1,
            1,
        )],
    );
    fake.changeset(
        3,
        "Jane Dev",
        "merge feat down",
        vec![sourced(
            file("$/P/a.txt", ChangeType::MERGE | ChangeType::EDIT),
            "$/P/feat/a.txt",
            2,
            2,
        )],
    );
    fake.content("$/P/a.txt", 3, "X");

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    assert_eq!(
        subjects(&main),
        vec!["merge feat down [CVCS-3]", "add a [CVCS-1]"]
    );
    assert_eq!(blob(&main, "HEAD:a.txt"), "X");
}

#[test]
fn range_merge_with_deleted_source() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add f", vec![file("$/P/f.txt", ChangeType::ADD)]);
    fake.content("$/P/f.txt", 1, "F0");
    fake.branch_object("$/P/feat", 2);
    fake.changeset(
        2,
        "Jane Dev",
        "branch feat",
        vec![sourced(
            file("$/P/feat/f.txt", ChangeType::BRANCH),
            "$/P/f.txt",
            1,
            1,
        )],
    );
    fake.changeset(
        3,
        "Jane Dev",
        "delete on feat",
        vec![file("$/P/feat/f.txt", ChangeType::DELETE)],
    );
    fake.changeset(
        4,
        "Jane Dev",
        "unrelated feat work",
        vec![file("$/P/feat/other.txt", ChangeType::ADD)],
    );
    fake.content("$/P/feat/other.txt", 4, "O");
    fake.changeset(
        5,
        "Jane Dev",
        "merge the range",
        vec![sourced(
            file("$/P/f.txt", ChangeType::MERGE | ChangeType::EDIT),
            "$/P/feat/f.txt",
            2,
            4,
        )],
    );

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    assert_eq!(
        subjects(&main),
        vec!["merge the range [CVCS-5]", "add f [CVCS-1]"]
    );
    // The source was deleted inside the range: the merge lands as a delete.
    assert!(tracked_files(&main).is_empty());
    let status = git(&main, &["show", "--name-status", "--format=", "HEAD"]);
    assert!(status.contains("D\tf.txt"), "unexpected status: {status}");
}

#[test]
fn intra_changeset_cross_branch_reference() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "seed", vec![file("$/P/seed.txt", ChangeType::ADD)]);
    fake.content("$/P/seed.txt", 1, "S");
    fake.branch_object("$/P/feat", 2);
    fake.changeset(
        2,
        "Jane Dev",
        "branch feat",
        vec![sourced(
            file("$/P/feat/seed.txt", ChangeType::BRANCH),
            "$/P/seed.txt",
            1,
            1,
        )],
    );
    fake.changeset(
        3,
        "Jane Dev",
        "add on feat and branch back",
        vec![
            file("$/P/feat/c.txt", ChangeType::ADD),
            sourced(file("$/P/c.txt", ChangeType::BRANCH), "$/P/feat/c.txt", 3, 3),
        ],
    );
    fake.content("$/P/feat/c.txt", 3, "CC");

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    let feat = out.path().join("feat");
    // The early commit closed feat before main's checkout read from it.
    assert_eq!(
        subjects(&feat),
        vec![
            "add on feat and branch back [CVCS-3]",
            "branch feat [CVCS-2]"
        ]
    );
    assert_eq!(blob(&main, "HEAD:c.txt"), "CC");
    assert_eq!(blob(&main, "HEAD:c.txt"), blob(&feat, "HEAD:c.txt"));

    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("laststate.json")).unwrap())
            .unwrap();
    assert_eq!(state["hashTracker"]["feat"]["3"], head_hash(&feat));
    assert_eq!(state["hashTracker"]["main"]["3"], head_hash(&main));
}

#[test]
fn folder_only_changesets_produce_no_commits() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add a", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "A");
    fake.changeset(
        2,
        "Jane Dev",
        "make some folders",
        vec![
            folder("$/P/docs", ChangeType::ADD),
            folder("$/P/docs/img", ChangeType::ADD),
        ],
    );

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    assert_eq!(subjects(&main), vec!["add a [CVCS-1]"]);
    assert!(main.join("docs/img").is_dir());
}

#[test]
fn empty_comments_still_commit() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "A");

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    assert_eq!(subjects(&out.path().join("main")), vec![" [CVCS-1]"]);
}

#[test]
fn merge_without_edit_is_a_noop() {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add a", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "A");
    fake.changeset(
        2,
        "Jane Dev",
        "contentless merge",
        vec![sourced(
            file("$/P/a.txt", ChangeType::MERGE),
            "$/P/feat/a.txt",
            1,
            1,
        )],
    );

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    assert_eq!(subjects(&out.path().join("main")), vec!["add a [CVCS-1]"]);
}

#[test]
fn foreign_sources_degrade_to_plain_adds() {
    let mut fake = FakeTfvc::new();
    fake.changeset(
        1,
        "Jane Dev",
        "branch in from another project",
        vec![sourced(
            file("$/P/import.txt", ChangeType::BRANCH),
            "$/Other/import.txt",
            7,
            7,
        )],
    );
    fake.content("$/P/import.txt", 1, "IMPORTED");

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    assert_eq!(blob(&main, "HEAD:import.txt"), "IMPORTED");
}

fn migrate_with_check(fake: FakeTfvc, out: &std::path::Path) -> anyhow::Result<()> {
    let mut config = config_for(out);
    config.with_integrity_check = true;
    tfvc2git::run(config, Box::new(fake))
}

fn checked_fixture() -> FakeTfvc {
    let mut fake = FakeTfvc::new();
    fake.changeset(1, "Jane Dev", "add a", vec![file("$/P/a.txt", ChangeType::ADD)]);
    fake.content("$/P/a.txt", 1, "A1");
    fake.changeset(2, "Jane Dev", "edit a", vec![file("$/P/a.txt", ChangeType::EDIT)]);
    fake.content("$/P/a.txt", 2, "A2");
    fake
}

#[test]
fn integrity_check_passes_on_a_faithful_replay() {
    let out = tempfile::tempdir().unwrap();
    migrate_with_check(checked_fixture(), out.path()).unwrap();
    assert_eq!(blob(&out.path().join("main"), "HEAD:a.txt"), "A2");
}

#[test]
fn integrity_check_ignores_zero_byte_redownloads() {
    let mut fake = checked_fixture();
    fake.quirk_redownload("$/P/a.txt", 2, RedownloadQuirk::Blank);
    let out = tempfile::tempdir().unwrap();
    migrate_with_check(fake, out.path()).unwrap();
    assert_eq!(blob(&out.path().join("main"), "HEAD:a.txt"), "A2");
}

#[test]
fn integrity_check_skips_failed_redownloads() {
    let mut fake = checked_fixture();
    fake.quirk_redownload("$/P/a.txt", 2, RedownloadQuirk::Fail);
    let out = tempfile::tempdir().unwrap();
    migrate_with_check(fake, out.path()).unwrap();
}

#[test]
fn integrity_check_mismatch_is_fatal() {
    let mut fake = checked_fixture();
    fake.quirk_redownload("$/P/a.txt", 2, RedownloadQuirk::Corrupt);
    let out = tempfile::tempdir().unwrap();
    let err = migrate_with_check(fake, out.path()).unwrap_err();
    assert!(
        format!("{err:#}").contains("integrity check failed"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn commit_messages_all_end_with_the_changeset_trailer() {
    let mut fake = FakeTfvc::new();
    fake.changeset(
        1,
        "Jane Dev",
        "multi\nline\ncomment",
        vec![file("$/P/a.txt", ChangeType::ADD)],
    );
    fake.content("$/P/a.txt", 1, "A");
    fake.changeset(2, "Jane Dev", "plain", vec![file("$/P/a.txt", ChangeType::EDIT)]);
    fake.content("$/P/a.txt", 2, "B");

    let out = tempfile::tempdir().unwrap();
    migrate(fake, out.path()).unwrap();

    let main = out.path().join("main");
    let bodies = git(&main, &["log", "--format=%B%x00"]);
    for body in bodies.split('\u{0}').filter(|b| !b.trim().is_empty()) {
        let trailer = body.trim_end().rsplit('\n').next().unwrap();
        assert!(
            trailer.trim_end().ends_with("]")
                && trailer.contains("[CVCS-"),
            "missing trailer in {body:?}"
        );
    }
}
