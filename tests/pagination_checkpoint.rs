use runvault::{AnyData, ApiError, ArchiveService, CancelToken, FilterEnv, RecordStore, ResultEntry};
use std::sync::Arc;

const PHASE_FILTER: &str = r#"taskrun.status.phase == "done""#;

fn service() -> ArchiveService {
    ArchiveService::new(
        Arc::new(RecordStore::open_in_memory().expect("open store")),
        Arc::new(FilterEnv::new()),
    )
}

/// Seeds `total` results; `matching(i)` controls whether the i-th one
/// satisfies [`PHASE_FILTER`]. Returns the matching names in ascending order.
fn seed(service: &ArchiveService, total: usize, matching: impl Fn(usize) -> bool) -> Vec<String> {
    let mut matches = Vec::new();
    for index in 0..total {
        let phase = if matching(index) { "done" } else { "running" };
        let seed = ResultEntry {
            executions: vec![AnyData::new(
                "type.example.dev/pipeline.v1.TaskRun",
                format!(r#"{{"status":{{"phase":"{phase}"}}}}"#).into_bytes(),
            )],
            ..ResultEntry::default()
        };
        let created = service
            .create_result("ns/load", seed, &CancelToken::never())
            .expect("create");
        if matching(index) {
            matches.push(created.name);
        }
    }
    matches.sort();
    matches
}

fn collect_all_pages(
    service: &ArchiveService,
    filter: &str,
    page_size: i64,
) -> (Vec<String>, Vec<usize>) {
    let mut names = Vec::new();
    let mut page_lengths = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = service
            .list_results("ns/load", filter, page_size, token.as_deref(), &CancelToken::never())
            .expect("list page");
        page_lengths.push(page.results.len());
        names.extend(page.results.into_iter().map(|entry| entry.name));
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    (names, page_lengths)
}

#[test]
fn concatenated_pages_cover_exactly_the_matching_set() {
    let service = service();
    let expected = seed(&service, 120, |index| index % 3 == 0);
    assert_eq!(expected.len(), 40);

    for page_size in [1_i64, 7, 50, 39, 40, 41, 10_000] {
        let (names, _) = collect_all_pages(&service, PHASE_FILTER, page_size);
        assert_eq!(
            names, expected,
            "page_size {page_size}: coverage must be exact, ordered, duplicate-free"
        );
    }
}

#[test]
fn low_selectivity_traversal_fills_every_page_but_the_last() {
    let service = service();
    // 1000 results of which 37 match.
    let expected = seed(&service, 1_000, |index| index % 27 == 5);
    assert_eq!(expected.len(), 37);

    let (names, page_lengths) = collect_all_pages(&service, PHASE_FILTER, 10);
    assert_eq!(names, expected);
    let (full_pages, last) = page_lengths.split_at(page_lengths.len() - 1);
    assert!(full_pages.iter().all(|len| *len == 10));
    assert_eq!(last, &[7]);
}

#[test]
fn unfiltered_listing_pages_through_everything() {
    let service = service();
    let expected = seed(&service, 55, |_| true);
    let (names, page_lengths) = collect_all_pages(&service, "", 0);
    assert_eq!(names, expected);
    // Default page size is 50: one full page plus the remainder.
    assert_eq!(page_lengths, vec![50, 5]);
}

#[test]
fn tokens_resume_only_under_the_original_filter() {
    let service = service();
    seed(&service, 10, |_| true);

    let page = service
        .list_results("ns/load", PHASE_FILTER, 4, None, &CancelToken::never())
        .expect("first page");
    let token = page.next_page_token.expect("token");

    // Same filter resumes.
    let resumed = service
        .list_results(
            "ns/load",
            PHASE_FILTER,
            4,
            Some(&token),
            &CancelToken::never(),
        )
        .expect("resume");
    assert!(!resumed.results.is_empty());

    // Any other filter text, even a semantically equal one, is rejected.
    for other in ["", r#"taskrun.status.phase=="done""#] {
        let err = service
            .list_results("ns/load", other, 4, Some(&token), &CancelToken::never())
            .expect_err("filter mismatch");
        assert!(matches!(err, ApiError::InvalidArgument(_)), "filter `{other}`");
    }
}

#[test]
fn tampered_tokens_are_rejected() {
    let service = service();
    seed(&service, 3, |_| true);
    let err = service
        .list_results("ns/load", "", 2, Some("not-a-token!"), &CancelToken::never())
        .expect_err("garbage token");
    assert!(matches!(err, ApiError::InvalidArgument(_)));
}

#[test]
fn page_size_bounds_are_enforced_at_the_surface() {
    let service = service();
    seed(&service, 3, |_| true);

    let err = service
        .list_results("ns/load", "", -1, None, &CancelToken::never())
        .expect_err("negative");
    assert!(matches!(err, ApiError::InvalidArgument(_)));

    // Oversized requests clamp silently instead of failing.
    let page = service
        .list_results("ns/load", "", 2_000_000, None, &CancelToken::never())
        .expect("clamped");
    assert_eq!(page.results.len(), 3);
    assert!(page.next_page_token.is_none());
}

#[test]
fn child_records_never_appear_in_result_listings() {
    let service = service();
    let expected = seed(&service, 4, |_| true);
    for name in &expected {
        service
            .create_record(
                name,
                Some(AnyData::new("Log", b"line".to_vec())),
                &CancelToken::never(),
            )
            .expect("record");
    }
    let (names, _) = collect_all_pages(&service, "", 2);
    assert_eq!(names, expected);
}

#[test]
fn rows_inserted_behind_the_cursor_do_not_disturb_later_pages() {
    let service = service();
    seed(&service, 6, |_| true);

    let first = service
        .list_results("ns/load", "", 3, None, &CancelToken::never())
        .expect("first page");
    let token = first.next_page_token.clone().expect("token");
    let boundary = first.results.last().expect("rows").name.clone();

    // A result whose name sorts before the cursor appears mid-traversal; the
    // resumed page must neither duplicate earlier rows nor go backwards.
    let mut straggler = ResultEntry::default();
    straggler.annotations.insert("late".into(), "true".into());
    service
        .create_result("ns/early", straggler, &CancelToken::never())
        .expect("straggler");

    let second = service
        .list_results("ns/load", "", 3, Some(&token), &CancelToken::never())
        .expect("second page");
    for entry in &second.results {
        assert!(entry.name > boundary, "{} leaked behind the cursor", entry.name);
    }
}
