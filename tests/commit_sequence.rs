//! Commit layer: replay, history-driven rebuild and rebase.

use patchstack::commits::{
    apply_feature_patches, parse_commit, rebase_feature_patches, rebuild_feature_patches,
    record_feature_commit, Author, CommitMeta, CommitStatus, HistoryStore,
};
use patchstack::{EngineOptions, PatchStackError, SourceTree};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn commit(subject: &str, body: &str, diff: &str) -> String {
    format!(
        "From 0000000000000000000000000000000000000000 Mon Sep 17 00:00:00 2001\n\
         From: Alex Smith <alex@example.com>\n\
         Date: Wed, 2 Jul 2025 09:30:00 +0100\n\
         Subject: [PATCH] {subject}\n\
         \n\
         {body}\n\
         \n\
         {diff}"
    )
}

struct Stack {
    dir: TempDir,
}

impl Stack {
    fn new() -> Self {
        let stack = Self {
            dir: TempDir::new().unwrap(),
        };
        write(&stack.base().path_of("Main.java"), "class Main {\n    void run() {}\n}\n");
        write(&stack.base().path_of("README"), "readme\n");
        stack
    }

    fn base(&self) -> SourceTree {
        SourceTree::new(self.dir.path().join("patched"))
    }

    fn target(&self) -> SourceTree {
        SourceTree::new(self.dir.path().join("final"))
    }

    fn patches(&self) -> PathBuf {
        self.dir.path().join("features")
    }

    fn add_commit(&self, name: &str, text: &str) {
        write(&self.patches().join(name), text);
    }

    fn dependent_pair(&self) {
        self.add_commit(
            "0001-add-helper.patch",
            &commit(
                "Add helper",
                "Adds a helper method.",
                concat!(
                    "diff --git a/Main.java b/Main.java\n",
                    "--- a/Main.java\n",
                    "+++ b/Main.java\n",
                    "@@ -1,3 +1,4 @@\n",
                    " class Main {\n",
                    "     void run() {}\n",
                    "+    void helper() {}\n",
                    " }\n",
                ),
            ),
        );
        self.add_commit(
            "0002-call-helper.patch",
            &commit(
                "Call helper",
                "Uses the helper.",
                concat!(
                    "diff --git a/Main.java b/Main.java\n",
                    "--- a/Main.java\n",
                    "+++ b/Main.java\n",
                    "@@ -1,4 +1,4 @@\n",
                    " class Main {\n",
                    "-    void run() {}\n",
                    "+    void run() { helper(); }\n",
                    "     void helper() {}\n",
                    " }\n",
                ),
            ),
        );
    }
}

#[test]
fn test_dependent_commits_apply_in_order() {
    let stack = Stack::new();
    stack.dependent_pair();

    let report =
        apply_feature_patches(&stack.base(), &stack.patches(), &stack.target(), &EngineOptions::default())
            .unwrap();
    assert!(report.is_success());
    assert_eq!(report.applied(), 2);
    assert_eq!(
        fs::read_to_string(stack.target().path_of("Main.java")).unwrap(),
        "class Main {\n    void run() { helper(); }\n    void helper() {}\n}\n"
    );

    let history = HistoryStore::new(&stack.target()).load().unwrap();
    assert_eq!(history.commits.len(), 2);
    assert_eq!(history.commits[1].meta.subject, "Call helper");
}

#[test]
fn test_first_commit_failure_skips_the_rest() {
    let stack = Stack::new();
    stack.dependent_pair();
    write(&stack.base().path_of("Main.java"), "class Main {\n    void start() {}\n}\n");

    let report =
        apply_feature_patches(&stack.base(), &stack.patches(), &stack.target(), &EngineOptions::default())
            .unwrap();
    assert_eq!(report.applied(), 0);
    assert!(matches!(report.outcomes[0].status, CommitStatus::Failed { .. }));
    assert_eq!(report.outcomes[1].status, CommitStatus::NotAttempted);

    match report.into_result() {
        Err(PatchStackError::SequenceBroken { commit, file, .. }) => {
            assert_eq!(commit, "0001-add-helper.patch");
            assert_eq!(file.as_deref(), Some("Main.java"));
        }
        other => panic!("expected SequenceBroken, got {other:?}"),
    }
    assert_eq!(
        fs::read_to_string(stack.target().path_of("Main.java")).unwrap(),
        "class Main {\n    void start() {}\n}\n"
    );
}

#[test]
fn test_malformed_commit_breaks_the_sequence() {
    let stack = Stack::new();
    stack.dependent_pair();
    stack.add_commit("0000-broken.patch", "this is not a commit\n");

    let report =
        apply_feature_patches(&stack.base(), &stack.patches(), &stack.target(), &EngineOptions::default())
            .unwrap();
    assert!(matches!(
        &report.outcomes[0].status,
        CommitStatus::Failed { reason, .. } if reason.starts_with("malformed commit")
    ));
    assert!(report.outcomes[1..]
        .iter()
        .all(|o| o.status == CommitStatus::NotAttempted));
}

#[test]
fn test_rebuild_preserves_metadata_and_bytes() {
    let stack = Stack::new();
    stack.dependent_pair();
    let options = EngineOptions::default();
    apply_feature_patches(&stack.base(), &stack.patches(), &stack.target(), &options).unwrap();

    let before: Vec<String> = ["0001-add-helper.patch", "0002-call-helper.patch"]
        .iter()
        .map(|name| fs::read_to_string(stack.patches().join(name)).unwrap())
        .collect();

    let rebuilt = rebuild_feature_patches(&stack.target(), &stack.patches(), None, &options).unwrap();
    assert_eq!(rebuilt.written.len() + rebuilt.unchanged, 2);
    assert!(rebuilt.removed.is_empty());
    for (name, original) in ["0001-add-helper.patch", "0002-call-helper.patch"]
        .iter()
        .zip(&before)
    {
        let text = fs::read_to_string(stack.patches().join(name)).unwrap();
        let again = parse_commit(text.as_bytes()).unwrap();
        let first = parse_commit(original.as_bytes()).unwrap();
        assert_eq!(again, first);
    }

    let second = rebuild_feature_patches(&stack.target(), &stack.patches(), None, &options).unwrap();
    assert!(second.written.is_empty());
}

#[test]
fn test_recorded_commit_survives_rebase_onto_new_base() {
    let stack = Stack::new();
    let options = EngineOptions::default();
    apply_feature_patches(&stack.base(), &stack.patches(), &stack.target(), &options).unwrap();

    write(&stack.target().path_of("Main.java"), "class Main {\n    void run() { go(); }\n}\n");
    let meta = CommitMeta {
        author: Author::parse("Robin <robin@example.com>"),
        date: "Thu, 3 Jul 2025 12:00:00 +0000".to_string(),
        subject: "Start going".to_string(),
        body: "Longer explanation.".to_string(),
    };
    record_feature_commit(&stack.base(), &stack.target(), meta.clone(), &options).unwrap();

    write(&stack.base().path_of("README"), "readme, regenerated\n");
    write(&stack.base().path_of("Extra.java"), "class Extra {}\n");
    let (rebuilt, applied) =
        rebase_feature_patches(&stack.base(), &stack.patches(), &stack.target(), &options).unwrap();
    assert_eq!(rebuilt.written, vec!["0001-start-going.patch"]);
    assert!(applied.is_success());

    let text = fs::read_to_string(stack.patches().join("0001-start-going.patch")).unwrap();
    assert_eq!(parse_commit(text.as_bytes()).unwrap().meta, meta);
    assert_eq!(
        fs::read_to_string(stack.target().path_of("README")).unwrap(),
        "readme, regenerated\n"
    );
    assert!(stack.target().path_of("Extra.java").exists());
    assert_eq!(
        HistoryStore::new(&stack.target()).load().unwrap().commits[0].meta,
        meta
    );
}

#[test]
fn test_message_with_separator_lines_survives_replay() {
    let stack = Stack::new();
    let options = EngineOptions::default();
    apply_feature_patches(&stack.base(), &stack.patches(), &stack.target(), &options).unwrap();

    write(
        &stack.target().path_of("Main.java"),
        "class Main {\n    void run() {}\n    void stop() {}\n}\n",
    );
    let meta = CommitMeta {
        author: Author::parse("Robin <robin@example.com>"),
        date: "Thu, 3 Jul 2025 12:00:00 +0000".to_string(),
        subject: "Add stop".to_string(),
        body: "Summary line.\n\n---\nDetails below the rule.\n-- \nNot a signature either.".to_string(),
    };
    record_feature_commit(&stack.base(), &stack.target(), meta.clone(), &options).unwrap();
    rebuild_feature_patches(&stack.target(), &stack.patches(), None, &options).unwrap();

    let report =
        apply_feature_patches(&stack.base(), &stack.patches(), &stack.target(), &options).unwrap();
    assert!(report.is_success());
    assert_eq!(
        HistoryStore::new(&stack.target()).load().unwrap().commits[0].meta,
        meta
    );

    let rebuilt = rebuild_feature_patches(&stack.target(), &stack.patches(), None, &options).unwrap();
    assert!(rebuilt.written.is_empty());
    let text = fs::read_to_string(stack.patches().join("0001-add-stop.patch")).unwrap();
    assert!(text.contains("---\nDetails below the rule.\n-- \nNot a signature either.\n"));
}
