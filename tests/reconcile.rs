use rubric_sync_core::config::MatchKey;
use rubric_sync_core::model::{Criterion, Rating, RubricModel};
use rubric_sync_core::reconcile::{diff, diff_with, CriterionOp, OperationKind};

fn criterion(name: &str, description: &str) -> Criterion {
    Criterion::new(
        name,
        description,
        vec![Rating::new("Excellent", 4.0), Rating::new("Good", 2.0)],
    )
}

fn local(criteria: Vec<Criterion>) -> RubricModel {
    RubricModel::new(criteria).expect("valid local model")
}

fn remote(criteria: Vec<(&str, Criterion)>) -> RubricModel {
    RubricModel::from_remote(
        criteria
            .into_iter()
            .map(|(id, c)| c.with_remote_id(id))
            .collect(),
    )
}

fn kinds(ops: &[CriterionOp]) -> Vec<(OperationKind, &str)> {
    ops.iter().map(|op| (op.kind(), op.name())).collect()
}

#[test]
fn new_criterion_against_empty_remote_is_a_single_create() {
    let changes = diff(
        &local(vec![criterion("Clarity", "")]),
        &RubricModel::default(),
    );
    assert_eq!(kinds(changes.ops()), vec![(OperationKind::Create, "Clarity")]);
    assert!(!changes.is_noop());
}

#[test]
fn update_create_then_delete_in_that_order() {
    let local = local(vec![criterion("A", "new wording"), criterion("B", "")]);
    let remote = remote(vec![("_1", criterion("A", "old wording")), ("_3", criterion("C", ""))]);

    let changes = diff(&local, &remote);
    assert_eq!(
        kinds(changes.ops()),
        vec![
            (OperationKind::Update, "A"),
            (OperationKind::Create, "B"),
            (OperationKind::Delete, "C"),
        ]
    );

    match &changes.ops()[0] {
        CriterionOp::Update {
            remote_id,
            criterion,
        } => {
            assert_eq!(remote_id, "_1");
            assert_eq!(criterion.description, "new wording");
            assert_eq!(criterion.ratings.len(), 2, "update carries the full payload");
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert_eq!(changes.ops()[2].remote_id(), Some("_3"));

    let summary = changes.summary();
    assert_eq!((summary.creates, summary.updates, summary.deletes, summary.unchanged), (1, 1, 1, 0));
}

#[test]
fn diff_is_deterministic() {
    let local = local(vec![criterion("A", "x"), criterion("B", ""), criterion("D", "")]);
    let remote = remote(vec![
        ("_1", criterion("A", "y")),
        ("_3", criterion("C", "")),
        ("_4", criterion("D", "")),
    ]);
    assert_eq!(diff(&local, &remote), diff(&local, &remote));
}

#[test]
fn diff_against_itself_is_all_unchanged() {
    let parsed = local(vec![criterion("A", "x"), criterion("B", "")]);
    let changes = diff(&parsed, &parsed);
    assert!(changes
        .ops()
        .iter()
        .all(|op| op.kind() == OperationKind::Unchanged));
    assert!(changes.is_noop());

    let fetched = remote(vec![("_1", criterion("A", "x")), ("_2", criterion("B", ""))]);
    let changes = diff(&fetched, &fetched);
    assert_eq!(changes.summary().unchanged, 2);
    assert_eq!(changes.ops()[1].remote_id(), Some("_2"));
}

#[test]
fn identical_content_with_different_rating_ids_is_unchanged() {
    let mut fetched = criterion("A", "").with_remote_id("_1");
    fetched.ratings[0].remote_id = Some("r1".into());
    let changes = diff(&local(vec![criterion("A", "")]), &RubricModel::from_remote(vec![fetched]));
    assert_eq!(kinds(changes.ops()), vec![(OperationKind::Unchanged, "A")]);
}

#[test]
fn any_rating_difference_is_an_update() {
    let base = local(vec![criterion("A", "")]);
    let variants = vec![
        Criterion::new("A", "", vec![Rating::new("Excellent", 5.0), Rating::new("Good", 2.0)]),
        Criterion::new("A", "", vec![Rating::new("Superb", 4.0), Rating::new("Good", 2.0)]),
        Criterion::new("A", "", vec![Rating::new("Excellent", 4.0)]),
        Criterion::new(
            "A",
            "",
            vec![
                Rating::new("Excellent", 4.0).with_long_description("changed"),
                Rating::new("Good", 2.0),
            ],
        ),
    ];
    for variant in variants {
        let remote = RubricModel::from_remote(vec![variant.with_remote_id("_1")]);
        assert_eq!(kinds(diff(&base, &remote).ops()), vec![(OperationKind::Update, "A")]);
    }
}

#[test]
fn deletes_never_precede_creates_or_updates() {
    let local = local(vec![criterion("Z", ""), criterion("A", "changed"), criterion("M", "")]);
    let remote = remote(vec![
        ("_9", criterion("Old1", "")),
        ("_1", criterion("A", "")),
        ("_8", criterion("Old2", "")),
    ]);
    let changes = diff(&local, &remote);
    let first_delete = changes
        .ops()
        .iter()
        .position(|op| op.kind() == OperationKind::Delete)
        .unwrap();
    assert!(changes.ops()[first_delete..]
        .iter()
        .all(|op| op.kind() == OperationKind::Delete));
    // Local order for the first part, remote order for the deletes.
    assert_eq!(
        kinds(changes.ops()),
        vec![
            (OperationKind::Create, "Z"),
            (OperationKind::Update, "A"),
            (OperationKind::Create, "M"),
            (OperationKind::Delete, "Old1"),
            (OperationKind::Delete, "Old2"),
        ]
    );
}

#[test]
fn name_matching_is_case_sensitive() {
    let changes = diff(
        &local(vec![criterion("clarity", "")]),
        &remote(vec![("_1", criterion("Clarity", ""))]),
    );
    assert_eq!(
        kinds(changes.ops()),
        vec![(OperationKind::Create, "clarity"), (OperationKind::Delete, "Clarity")]
    );
}

#[test]
fn duplicate_remote_names_are_matched_once() {
    let remote = remote(vec![("_1", criterion("A", "")), ("_2", criterion("A", ""))]);
    let changes = diff(&local(vec![criterion("A", "")]), &remote);
    assert_eq!(
        kinds(changes.ops()),
        vec![(OperationKind::Unchanged, "A"), (OperationKind::Delete, "A")]
    );
    assert_eq!(changes.ops()[1].remote_id(), Some("_2"));
}

#[test]
fn remote_id_key_turns_renames_into_updates() {
    let renamed = local(vec![criterion("Clarity of argument", "").with_remote_id("_1")]);
    let remote = remote(vec![("_1", criterion("Clarity", ""))]);

    let by_name = diff_with(&renamed, &remote, MatchKey::Name);
    assert_eq!(
        kinds(by_name.ops()),
        vec![
            (OperationKind::Create, "Clarity of argument"),
            (OperationKind::Delete, "Clarity")
        ]
    );

    let by_id = diff_with(&renamed, &remote, MatchKey::RemoteIdThenName);
    assert_eq!(kinds(by_id.ops()), vec![(OperationKind::Update, "Clarity of argument")]);
    assert_eq!(by_id.ops()[0].remote_id(), Some("_1"));
}

#[test]
fn remote_id_key_falls_back_to_name() {
    let local = local(vec![
        criterion("A", "").with_remote_id("_gone"),
        criterion("B", ""),
    ]);
    let remote = remote(vec![("_1", criterion("A", "")), ("_2", criterion("B", ""))]);
    let changes = diff_with(&local, &remote, MatchKey::RemoteIdThenName);
    assert_eq!(
        kinds(changes.ops()),
        vec![(OperationKind::Unchanged, "A"), (OperationKind::Unchanged, "B")]
    );
}

#[test]
fn claimed_id_match_falls_back_to_unclaimed_name_match() {
    // Both rows carry the id of A; B must still pair with its own remote by name.
    let local = local(vec![
        criterion("A", "").with_remote_id("_1"),
        criterion("B", "").with_remote_id("_1"),
    ]);
    let remote = remote(vec![("_1", criterion("A", "")), ("_2", criterion("B", ""))]);
    let changes = diff_with(&local, &remote, MatchKey::RemoteIdThenName);
    assert_eq!(
        kinds(changes.ops()),
        vec![(OperationKind::Unchanged, "A"), (OperationKind::Unchanged, "B")]
    );
    assert_eq!(changes.ops()[1].remote_id(), Some("_2"));
}

#[test]
fn remote_criteria_without_ids_are_never_deleted_or_updated() {
    let remote = RubricModel::from_remote(vec![criterion("A", "old"), criterion("Orphan", "")]);
    let changes = diff(&local(vec![criterion("A", "new")]), &remote);
    assert_eq!(kinds(changes.ops()), vec![(OperationKind::Create, "A")]);
}

#[test]
fn change_set_serializes_with_op_tags() {
    let changes = diff(&local(vec![criterion("A", "")]), &RubricModel::default());
    let json = serde_json::to_value(&changes).unwrap();
    assert_eq!(json["ops"][0]["op"], "create");
    assert_eq!(json["ops"][0]["criterion"]["name"], "A");
}
