//! End-to-end runs of the filtering pipeline against tool stand-ins.
//!
//! Tests cover:
//! 1. History propagation down the orders and filtering by it
//! 2. Sequential and concurrent scheduling producing identical output
//! 3. Sharded output
//! 4. Failure handling before, during and after the per-order work

use crate::config::{Config, CountsConfig};
use crate::error::FilterError;
use crate::run_pipeline;
use crate::test_support::{write_count_dir, FakeTools};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const WORDS: [&str; 4] = ["a", "b", "c", "d"];

fn test_config(input: &Path, output: &Path, ngram_order: usize, parallel: bool) -> Config {
    let mut config = Config {
        counts: CountsConfig {
            all_count_dir: input.to_path_buf(),
            filter_count_dir: output.to_path_buf(),
            ngram_order,
            num_splits: 0,
        },
        tools: FakeTools::get().config(),
        ..Default::default()
    };
    config.processing.parallel = parallel;
    config.processing.enable_metrics = false;
    config
}

/// Every history of `len` words over the test vocabulary.
fn all_histories(len: usize) -> Vec<String> {
    let mut histories = vec![String::new()];
    for _ in 0..len {
        histories = histories
            .iter()
            .flat_map(|prefix| {
                WORDS.iter().map(move |w| {
                    if prefix.is_empty() {
                        w.to_string()
                    } else {
                        format!("{} {}", prefix, w)
                    }
                })
            })
            .collect();
    }
    histories
}

/// Training counts for one source at one order: every history, two words each.
fn train_counts(source: usize, order: usize) -> String {
    all_histories(order - 1)
        .iter()
        .enumerate()
        .flat_map(|(i, h)| {
            vec![
                format!("{}\ta {}\n", h, source + i),
                format!("{}\td {}\n", h, source * 2 + order),
            ]
        })
        .collect()
}

/// Dev counts per order, chosen so every order adds histories of its own.
fn dev_counts() -> BTreeMap<usize, String> {
    BTreeMap::from([
        (4, "a b c\td 1\nb c d\ta 2\na b c\tb 1\n".to_string()),
        (3, "a b\tc 1\nc d\ta 1\nd d\tb 3\n".to_string()),
        (2, "a\tb 1\nd\tc 2\n".to_string()),
    ])
}

fn write_fixture(root: &Path, num_sources: usize, max_order: usize) {
    let train: Vec<(usize, usize, String)> = (1..=num_sources)
        .flat_map(|n| (2..=max_order).map(move |o| (n, o, train_counts(n, o))))
        .collect();
    let train_refs: Vec<(usize, usize, &str)> =
        train.iter().map(|(n, o, c)| (*n, *o, c.as_str())).collect();
    let dev = dev_counts();
    let dev_refs: Vec<(usize, &str)> = dev
        .iter()
        .filter(|(o, _)| **o <= max_order)
        .map(|(o, c)| (*o, c.as_str()))
        .collect();
    write_count_dir(root, num_sources, &train_refs, &dev_refs);
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("reading {}: {}", path.display(), e))
        .lines()
        .map(str::to_string)
        .collect()
}

fn dev_histories(contents: &str) -> BTreeSet<String> {
    contents
        .lines()
        .filter_map(|l| l.split('\t').next())
        .map(str::to_string)
        .collect()
}

/// Every produced artifact, keyed by file name, excluding logs.
fn artifacts(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_file())
        .map(|p| {
            let name = p.file_name().unwrap().to_string_lossy().into_owned();
            (name, std::fs::read(&p).unwrap())
        })
        .collect()
}

fn setup(num_sources: usize, max_order: usize) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("counts");
    write_fixture(&input, num_sources, max_order);
    (dir, input)
}

#[tokio::test]
async fn test_two_order_scenario() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("counts");
    let output = dir.path().join("filtered");
    write_count_dir(
        &input,
        1,
        &[
            (1, 3, "a b\tc 2\nb b\tc 1\n"),
            (1, 2, "a b\tq 2\nc\tr 1\nd\ts 4\n"),
        ],
        &[(3, "a b\tx 1\n"), (2, "c\ty 1\n")],
    );

    let stats = run_pipeline(test_config(&input, &output, 3, true)).await.unwrap();

    assert_eq!(read_lines(&output.join("lastest_hist.3")), vec!["a b"]);
    assert_eq!(read_lines(&output.join("lastest_hist.2")), vec!["a b", "c"]);
    assert_eq!(read_lines(&output.join("int.1.2")), vec!["a b\tq 2", "c\tr 1"]);
    assert_eq!(read_lines(&output.join("int.1.3")), vec!["a b\tc 2"]);

    assert_eq!(stats.histories_built, 2);
    assert_eq!(stats.counts_filtered, 2);
    assert_eq!(std::fs::read_to_string(output.join("ngram_order")).unwrap(), "3\n");
}

#[tokio::test]
async fn test_output_layout() {
    let (dir, input) = setup(2, 3);
    let output = dir.path().join("filtered");

    run_pipeline(test_config(&input, &output, 3, true)).await.unwrap();

    for name in [
        "num_train_sets",
        "num_words",
        "names",
        "words.txt",
        "ngram_order",
        "int.dev",
        "int.dev.2",
        "int.dev.3",
        "lastest_hist.dev.3",
        "lastest_hist.dev.2",
        "lastest_hist.3",
        "lastest_hist.2",
        "int.1.3",
        "int.1.2",
        "int.2.3",
        "int.2.2",
    ] {
        assert!(output.join(name).is_file(), "missing {}", name);
    }
    for log in [
        "extract-histories.3.log",
        "extract-histories.2.log",
        "merge-histories.2.log",
        "filter_counts.1.3.log",
        "filter_counts.2.2.log",
    ] {
        assert!(output.join("log").join(log).is_file(), "missing log {}", log);
    }
    assert!(!output.join("unigram_weights").exists());
}

#[tokio::test]
async fn test_histories_are_supersets_of_dev_histories() {
    let (dir, input) = setup(1, 4);
    let output = dir.path().join("filtered");

    run_pipeline(test_config(&input, &output, 4, true)).await.unwrap();

    let dev = dev_counts();
    for order in 2..=4 {
        let merged: BTreeSet<String> = read_lines(&output.join(format!("lastest_hist.{}", order)))
            .into_iter()
            .collect();
        let own = dev_histories(&dev[&order]);
        assert!(own.is_subset(&merged), "order {} lost dev histories", order);

        if order < 4 {
            let higher: BTreeSet<String> =
                read_lines(&output.join(format!("lastest_hist.{}", order + 1)))
                    .into_iter()
                    .collect();
            assert!(higher.is_subset(&merged), "order {} lost order {}", order, order + 1);
            assert_eq!(merged, own.union(&higher).cloned().collect());
        }
    }
}

#[tokio::test]
async fn test_filtered_counts_only_keep_merged_histories() {
    let (dir, input) = setup(3, 4);
    let output = dir.path().join("filtered");

    run_pipeline(test_config(&input, &output, 4, true)).await.unwrap();

    for order in 2..=4 {
        let merged: BTreeSet<String> = read_lines(&output.join(format!("lastest_hist.{}", order)))
            .into_iter()
            .collect();
        for source in 1..=3 {
            let expected: Vec<String> = train_counts(source, order)
                .lines()
                .filter(|l| merged.contains(l.split('\t').next().unwrap()))
                .map(str::to_string)
                .collect();
            let filtered = read_lines(&output.join(format!("int.{}.{}", source, order)));
            assert!(!filtered.is_empty());
            assert_eq!(filtered, expected, "source {} order {}", source, order);
        }
    }
}

#[tokio::test]
async fn test_parallel_and_sequential_outputs_match() {
    let (dir, input) = setup(3, 4);
    let sequential = dir.path().join("filtered_seq");
    let concurrent = dir.path().join("filtered_par");

    run_pipeline(test_config(&input, &sequential, 4, false)).await.unwrap();
    run_pipeline(test_config(&input, &concurrent, 4, true)).await.unwrap();

    let sequential = artifacts(&sequential);
    let concurrent = artifacts(&concurrent);
    assert_eq!(
        sequential.keys().collect::<Vec<_>>(),
        concurrent.keys().collect::<Vec<_>>()
    );
    for (name, contents) in &sequential {
        assert_eq!(contents, &concurrent[name], "{} differs", name);
    }
}

#[tokio::test]
async fn test_sequential_reruns_are_byte_identical() {
    let (dir, input) = setup(2, 3);
    let first = dir.path().join("filtered_1");
    let second = dir.path().join("filtered_2");

    run_pipeline(test_config(&input, &first, 3, false)).await.unwrap();
    run_pipeline(test_config(&input, &second, 3, false)).await.unwrap();

    assert_eq!(artifacts(&first), artifacts(&second));
}

#[tokio::test]
async fn test_rerun_overwrites_output() {
    let (dir, input) = setup(1, 3);
    let output = dir.path().join("filtered");

    run_pipeline(test_config(&input, &output, 3, true)).await.unwrap();
    let before = artifacts(&output);
    run_pipeline(test_config(&input, &output, 3, true)).await.unwrap();

    assert_eq!(before, artifacts(&output));
}

#[tokio::test]
async fn test_sharded_output_matches_unsharded() {
    let (dir, input) = setup(2, 3);
    let single = dir.path().join("filtered_single");
    let sharded = dir.path().join("filtered_sharded");

    run_pipeline(test_config(&input, &single, 3, true)).await.unwrap();
    let mut config = test_config(&input, &sharded, 3, true);
    config.counts.num_splits = 3;
    let stats = run_pipeline(config).await.unwrap();

    assert_eq!(stats.shards_written, 2 * 2 * 3);
    for source in 1..=2 {
        for order in 2..=3 {
            assert!(!sharded.join(format!("int.{}.{}", source, order)).exists());

            let mut from_shards = BTreeSet::new();
            for shard in 1..=3 {
                let path = sharded.join(format!("int.{}.{}.split{}", source, order, shard));
                from_shards.extend(read_lines(&path));
            }
            assert!(!sharded.join(format!("int.{}.{}.split4", source, order)).exists());

            let unsharded: BTreeSet<String> =
                read_lines(&single.join(format!("int.{}.{}", source, order)))
                    .into_iter()
                    .collect();
            assert_eq!(from_shards, unsharded);
        }
    }
}

#[tokio::test]
async fn test_unigram_order_aborts_before_any_output() {
    let (dir, input) = setup(1, 2);
    let output = dir.path().join("filtered");

    let err = run_pipeline(test_config(&input, &output, 1, true)).await.unwrap_err();

    assert!(matches!(err, FilterError::Config(_)));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_invalid_input_dir_aborts_before_any_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("not-counts");
    std::fs::create_dir_all(&input).unwrap();
    let output = dir.path().join("filtered");

    let err = run_pipeline(test_config(&input, &output, 3, true)).await.unwrap_err();

    assert!(matches!(err, FilterError::Validation { .. }));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_extract_failure_points_at_log() {
    for parallel in [false, true] {
        let (dir, input) = setup(2, 3);
        let output = dir.path().join("filtered");
        let mut config = test_config(&input, &output, 3, parallel);
        config.tools.extract_histories = FakeTools::get().path("failing-tool");

        let err = run_pipeline(config).await.unwrap_err();

        assert!(matches!(err, FilterError::CommandFailed { .. }));
        assert_eq!(
            err.log_path(),
            Some(&output.join("log").join("extract-histories.3.log"))
        );
        // nothing below the failed order was attempted
        assert!(!output.join("lastest_hist.2").exists());
        assert!(!output.join("int.1.3").exists());
        assert!(!output.join("int.dev.3").exists());
    }
}

#[tokio::test]
async fn test_missing_train_counts_fail_the_run() {
    let (dir, input) = setup(2, 3);
    std::fs::remove_file(input.join("int.2.2")).unwrap();
    let output = dir.path().join("filtered");

    let err = run_pipeline(test_config(&input, &output, 3, true)).await.unwrap_err();

    assert!(matches!(err, FilterError::CommandFailed { .. }));
    assert_eq!(
        err.log_path(),
        Some(&output.join("log").join("filter_counts.2.2.log"))
    );
    // already produced files are left in place
    assert!(output.join("lastest_hist.3").is_file());
}

#[tokio::test]
async fn test_post_validation_failure_is_reported() {
    let (dir, input) = setup(1, 2);
    let output = dir.path().join("filtered");
    let mut config = test_config(&input, &output, 2, true);
    config.tools.validator = FakeTools::get().path("reject-filtered-validator");

    let err = run_pipeline(config).await.unwrap_err();

    match err {
        FilterError::Validation { dir } => assert_eq!(dir, output),
        other => panic!("unexpected error: {other}"),
    }
    // the per-order work completed before the final check
    assert!(output.join("int.1.2").is_file());
    assert!(output.join("int.dev.2").is_file());
}

#[tokio::test]
async fn test_unigram_weights_are_copied() {
    let (dir, input) = setup(1, 2);
    std::fs::write(input.join("unigram_weights"), "1 1.0\n").unwrap();
    let output = dir.path().join("filtered");

    run_pipeline(test_config(&input, &output, 2, false)).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(output.join("unigram_weights")).unwrap(),
        "1 1.0\n"
    );
}

#[tokio::test]
async fn test_concurrency_of_one_matches_default() {
    let (dir, input) = setup(3, 3);
    let narrow = dir.path().join("filtered_narrow");
    let wide = dir.path().join("filtered_wide");

    let mut config = test_config(&input, &narrow, 3, true);
    config.processing.concurrency = 1;
    run_pipeline(config).await.unwrap();
    run_pipeline(test_config(&input, &wide, 3, true)).await.unwrap();

    assert_eq!(artifacts(&narrow), artifacts(&wide));
}
