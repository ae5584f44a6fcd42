//! Auto-merge: deterministic reconciliation of concurrent branches.

use entivc_core::{Change, Delta, Entity, Repository};
use entivc_testkit::repo_on;
use serde_json::json;

fn shared_note() -> Entity {
    Entity::with_id("Note", "n")
        .with_field("title", "a")
        .with_field("body", "b")
}

/// Seeds dev1 with the base commit and lets dev2 adopt it.
fn seeded_pair() -> (Repository, Repository) {
    let mut dev1 = repo_on("dev1");
    let mut dev2 = repo_on("dev2");

    dev1.commit(
        Delta::from_changes([Change::create(&shared_note())]).unwrap(),
        "base",
    )
    .unwrap();

    dev2.pull_from(&dev1).unwrap();
    dev2.auto_merge().unwrap();
    (dev1, dev2)
}

/// Pulls and merges both ways until the graphs stop changing.
fn sync_until_stable(a: &mut Repository, b: &mut Repository) {
    for _ in 0..8 {
        a.pull_from(b).unwrap();
        a.auto_merge().unwrap();
        b.pull_from(a).unwrap();
        b.auto_merge().unwrap();
        if a.graph_data() == b.graph_data() {
            return;
        }
    }
    panic!("replicas failed to converge");
}

#[test]
fn junior_adopts_senior_history() {
    let (dev1, dev2) = seeded_pair();

    assert_eq!(dev2.head_commit_id(), dev1.head_commit_id());
    assert_eq!(dev2.head_store().get("n"), dev1.head_store().get("n"));
}

#[test]
fn concurrent_updates_trim_the_junior_commit() {
    let (mut dev1, mut dev2) = seeded_pair();

    // dev1 (senior) renames the title; dev2 (junior) touches both keys.
    let base = dev1.head_store().get("n").unwrap();
    dev1.commit(
        Delta::from_changes([Change::update(
            &base,
            &base.clone().with_field("title", "S"),
        )
        .unwrap()])
        .unwrap(),
        "senior title",
    )
    .unwrap();

    let base = dev2.head_store().get("n").unwrap();
    dev2.commit(
        Delta::from_changes([Change::update(
            &base,
            &base
                .clone()
                .with_field("title", "J")
                .with_field("body", "c"),
        )
        .unwrap()])
        .unwrap(),
        "junior title and body",
    )
    .unwrap();

    // Junior pulls first: its commit is rewritten to the body change.
    dev2.pull_from(&dev1).unwrap();
    dev2.auto_merge().unwrap();

    let merged = dev2.head_store().get("n").unwrap();
    assert_eq!(merged.field("title"), Some(&json!("S")));
    assert_eq!(merged.field("body"), Some(&json!("c")));

    let chain_head = dev2.head_commit_id().unwrap();
    let rewritten = dev2
        .graph_data()
        .commits
        .iter()
        .find(|c| c.id == chain_head)
        .cloned()
        .unwrap();
    assert_eq!(rewritten.message, "junior title and body");

    // Senior pulls the trimmed commit and accepts it unchanged.
    dev1.pull_from(&dev2).unwrap();
    dev1.auto_merge().unwrap();

    assert_eq!(dev1.head_commit_id(), dev2.head_commit_id());
    assert_eq!(dev1.root_hash().unwrap(), dev2.root_hash().unwrap());
    assert_eq!(dev1.head_store().get("n"), dev2.head_store().get("n"));
}

#[test]
fn convergence_does_not_depend_on_pull_order() {
    let run = |senior_pulls_first: bool| {
        let (mut dev1, mut dev2) = seeded_pair();

        let base = dev1.head_store().get("n").unwrap();
        dev1.commit(
            Delta::from_changes([Change::update(
                &base,
                &base.clone().with_field("title", "S"),
            )
            .unwrap()])
            .unwrap(),
            "senior",
        )
        .unwrap();

        let base = dev2.head_store().get("n").unwrap();
        dev2.commit(
            Delta::from_changes([Change::update(
                &base,
                &base
                    .clone()
                    .with_field("title", "J")
                    .with_field("body", "c"),
            )
            .unwrap()])
            .unwrap(),
            "junior",
        )
        .unwrap();

        if senior_pulls_first {
            dev1.pull_from(&dev2).unwrap();
            dev1.auto_merge().unwrap();
        }
        sync_until_stable(&mut dev1, &mut dev2);

        let entity = dev1.head_store().get("n").unwrap();
        (
            entity.field("title").cloned(),
            entity.field("body").cloned(),
            dev1.root_hash().unwrap(),
        )
    };

    let first = run(true);
    let second = run(false);

    assert_eq!(first.0, Some(json!("S")));
    assert_eq!(first.1, Some(json!("c")));
    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
    assert_eq!(first.2, second.2);
}

#[test]
fn concurrent_creates_of_the_same_id_keep_the_senior_one() {
    let (mut dev1, mut dev2) = seeded_pair();

    dev1.commit(
        Delta::from_changes([Change::create(
            &Entity::with_id("Page", "p").with_field("name", "senior"),
        )])
        .unwrap(),
        "senior create",
    )
    .unwrap();
    dev2.commit(
        Delta::from_changes([Change::create(
            &Entity::with_id("Page", "p").with_field("name", "junior"),
        )])
        .unwrap(),
        "junior create",
    )
    .unwrap();

    sync_until_stable(&mut dev1, &mut dev2);

    let page = dev1.head_store().get("p").unwrap();
    assert_eq!(page.field("name"), Some(&json!("senior")));
    assert_eq!(dev1.root_hash().unwrap(), dev2.root_hash().unwrap());
}

#[test]
fn concurrent_deletes_collapse_silently() {
    let (mut dev1, mut dev2) = seeded_pair();

    let live = dev1.head_store().get("n").unwrap();
    dev1.commit(
        Delta::from_changes([Change::delete(&live)]).unwrap(),
        "senior delete",
    )
    .unwrap();
    let live = dev2.head_store().get("n").unwrap();
    dev2.commit(
        Delta::from_changes([Change::delete(&live)]).unwrap(),
        "junior delete",
    )
    .unwrap();

    sync_until_stable(&mut dev1, &mut dev2);

    assert!(dev1.head_store().is_empty());
    assert!(dev2.head_store().is_empty());
    assert_eq!(dev1.root_hash().unwrap(), dev2.root_hash().unwrap());
}

#[test]
fn senior_keeps_its_commit_when_pulling_an_unmerged_junior() {
    let (mut dev1, mut dev2) = seeded_pair();

    let base = dev1.head_store().get("n").unwrap();
    let senior_commit = dev1
        .commit(
            Delta::from_changes([Change::update(
                &base,
                &base.clone().with_field("title", "S"),
            )
            .unwrap()])
            .unwrap(),
            "senior",
        )
        .unwrap();

    let base = dev2.head_store().get("n").unwrap();
    dev2.commit(
        Delta::from_changes([Change::update(
            &base,
            &base.clone().with_field("title", "J"),
        )
        .unwrap()])
        .unwrap(),
        "junior",
    )
    .unwrap();

    // The senior sees the junior's diverging commit but does not yield.
    dev1.pull_from(&dev2).unwrap();
    dev1.auto_merge().unwrap();

    assert_eq!(dev1.head_commit_id(), Some(senior_commit.id));
    assert_eq!(
        dev1.head_store().get("n").unwrap().field("title"),
        Some(&json!("S"))
    );
}
