use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docmirror::config::{Config, Publication, PublicationMap};
use docmirror::contract::{FetchError, MockFetcher};
use docmirror::generate::generate;
use docmirror::link::LinkKind;
use tempfile::{tempdir, TempDir};

const RAW_HOST: &str = "https://raw.example.test";
const REPO_README: &str = "https://github.com/org/repo/blob/main/README.md";
const RAW_README: &str = "https://raw.example.test/org/repo/main/README.md";
const RAW_INTRO: &str = "https://raw.example.test/org/repo/main/docs/intro.md";

struct Workspace {
    _dir: TempDir,
    source: PathBuf,
    mirror: PathBuf,
    output: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self {
            source: root.join("source"),
            mirror: root.join("compiled"),
            output: root.join("docs"),
            _dir: dir,
        }
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.source.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Config with one rule mirroring `github.com/org/<repo>` under `destinations`.
    fn config(&self, destinations: &[(&str, &str)], update: bool) -> Config {
        let mut config = Config::new(
            self.source.clone(),
            self.mirror.clone(),
            self.output.clone(),
        );
        config.raw_host = RAW_HOST.to_string();
        let map: BTreeMap<String, String> = destinations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config.publications = vec![
            Publication {
                pattern: Some("github.com/org".to_string()),
                map: Some(PublicationMap::Segments(map)),
                update,
                ..Publication::plain()
            },
            Publication::plain(),
        ];
        config
    }
}

fn read(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path.as_ref())
        .unwrap_or_else(|e| panic!("reading {}: {e}", path.as_ref().display()))
}

/// Remote repository serving a README that links to a nested document which links back.
fn repo_fetcher() -> MockFetcher {
    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher
        .expect_fetch()
        .withf(|url: &str| url == RAW_README)
        .times(1)
        .returning(|_| Ok(b"# Repo\n\nSee [intro](./docs/intro.md).\n".to_vec()));
    fetcher
        .expect_fetch()
        .withf(|url: &str| url == RAW_INTRO)
        .times(1)
        .returning(|_| Ok(b"# Intro\n\nBack to [readme](../README.md).\n".to_vec()));
    fetcher
}

#[tokio::test]
async fn test_local_tree_is_relinked_without_network() {
    let ws = Workspace::new();
    ws.write(
        "README.md",
        "# Home\n\n- [Guide](./guide/a.md#setup)\n- [Other](/guide/b.md)\n",
    );
    ws.write("guide/a.md", "# A\n\n[Home](../README.md) and [b](b.md)\n");
    ws.write("guide/b.md", "# B\n\n[a](/guide/a.md)\n");
    ws.write("img/logo.svg", "<svg/>");

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().never();
    fetcher.expect_fetch().never();

    let config = ws.config(&[], false);
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation should succeed");

    assert_eq!(report.fetches, 0);
    assert_eq!(report.rounds, 1);
    assert!(report.diagnostics.is_clean(), "{:?}", report.diagnostics);
    assert!(report.written.is_empty());

    let home = read(ws.output.join("index.html"));
    assert!(home.contains("href=\"./guide/a.html#setup\""), "{home}");
    assert!(home.contains("href=\"./guide/b.html\""), "{home}");

    let a = read(ws.output.join("guide/a.html"));
    assert!(a.contains("href=\"../index.html\""), "{a}");
    assert!(a.contains("href=\"b.html\""), "{a}");

    let b = read(ws.output.join("guide/b.html"));
    assert!(b.contains("href=\"./a.html\""), "{b}");

    assert_eq!(read(ws.output.join("img/logo.svg")), "<svg/>");
    assert!(ws.output.join(".docs/default.css").exists());

    // Hand-authored sources and their mirror copies stay as written.
    assert_eq!(
        read(ws.source.join("guide/a.md")),
        "# A\n\n[Home](../README.md) and [b](b.md)\n"
    );
    assert_eq!(
        read(ws.mirror.join("guide/a.md")),
        "# A\n\n[Home](../README.md) and [b](b.md)\n"
    );

    let changes = report
        .changes
        .get(&ws.mirror.join("guide/a.md"))
        .expect("changes recorded for guide/a.md");
    assert!(!changes.write);
    assert!(changes.links.contains_key(&LinkKind::Internal));
}

#[tokio::test]
async fn test_remote_readme_is_mirrored_as_index() {
    let ws = Workspace::new();
    ws.write("guide.md", &format!("See [z]({REPO_README}).\n"));

    let config = ws.config(&[("repo", "libraries/repo")], false);
    let report = generate(&config, Arc::new(repo_fetcher()))
        .await
        .expect("generation should succeed");

    assert_eq!(report.fetches, 2);
    assert_eq!(report.rounds, 3);
    assert!(report.diagnostics.is_clean(), "{:?}", report.diagnostics);

    // README.md is stored under the index name.
    assert!(ws.mirror.join("libraries/repo/index.md").exists());
    assert!(!ws.mirror.join("libraries/repo/README.md").exists());

    let guide = read(ws.output.join("guide.html"));
    assert!(guide.contains("href=\"./libraries/repo/index.html\""), "{guide}");

    let index = read(ws.output.join("libraries/repo/index.html"));
    assert!(index.contains("href=\"./docs/intro.html\""), "{index}");

    // The downloaded document is rewritten to point at the local index.
    let intro_source = ws.mirror.join("libraries/repo/docs/intro.md");
    assert_eq!(read(&intro_source), "# Intro\n\nBack to [readme](../index.md).\n");
    assert!(report.written.contains(&intro_source));

    let intro = read(ws.output.join("libraries/repo/docs/intro.html"));
    assert!(intro.contains("href=\"../index.html\""), "{intro}");

    // The hand-authored document is never rewritten.
    assert_eq!(read(ws.source.join("guide.md")), format!("See [z]({REPO_README}).\n"));
    assert_eq!(read(ws.mirror.join("guide.md")), format!("See [z]({REPO_README}).\n"));
    assert_eq!(
        report.changes.occurrences(
            &ws.mirror.join("guide.md"),
            LinkKind::Transferred,
            REPO_README
        ),
        1
    );
}

#[tokio::test]
async fn test_second_run_fetches_nothing_and_changes_nothing() {
    let ws = Workspace::new();
    ws.write("guide.md", &format!("See [z]({REPO_README}).\n"));
    let config = ws.config(&[("repo", "libraries/repo")], false);

    generate(&config, Arc::new(repo_fetcher()))
        .await
        .expect("first run should succeed");
    let pages = ["guide.html", "libraries/repo/index.html", "libraries/repo/docs/intro.html"];
    let first: Vec<String> = pages.iter().map(|p| read(ws.output.join(p))).collect();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher.expect_fetch().never();

    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("second run should succeed");

    assert_eq!(report.fetches, 0);
    assert_eq!(report.rounds, 1);
    assert!(report.written.is_empty(), "{:?}", report.written);
    assert!(report.diagnostics.is_clean(), "{:?}", report.diagnostics);
    let second: Vec<String> = pages.iter().map(|p| read(ws.output.join(p))).collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_shared_target_is_fetched_once() {
    let ws = Workspace::new();
    ws.write(
        "a.md",
        &format!("First [x]({REPO_README}).\nAgain [x]({REPO_README}#install).\n"),
    );
    ws.write("b.md", &format!("Also [x]({REPO_README}).\n"));

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher
        .expect_fetch()
        .withf(|url: &str| url == RAW_README)
        .times(1)
        .returning(|_| Ok(b"# Repo\n".to_vec()));

    let config = ws.config(&[("repo", "libraries/repo")], false);
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation should succeed");

    assert_eq!(report.fetches, 1);
    let a = read(ws.output.join("a.html"));
    assert!(a.contains("href=\"./libraries/repo/index.html\""), "{a}");
    assert!(a.contains("href=\"./libraries/repo/index.html#install\""), "{a}");
    let b = read(ws.output.join("b.html"));
    assert!(b.contains("href=\"./libraries/repo/index.html\""), "{b}");

    // Both documents register their links as transferred to the same mirror file.
    let a_doc = ws.mirror.join("a.md");
    let b_doc = ws.mirror.join("b.md");
    assert_eq!(
        report.changes.occurrences(&a_doc, LinkKind::Transferred, REPO_README),
        2
    );
    assert_eq!(
        report.changes.occurrences(&b_doc, LinkKind::Transferred, REPO_README),
        1
    );
    for doc in [&a_doc, &b_doc] {
        let change = &report.changes.get(doc).expect("changes recorded").links
            [&LinkKind::Transferred][REPO_README];
        assert_eq!(change.source, "./libraries/repo/index.md");
    }
}

#[tokio::test]
async fn test_second_url_for_the_same_mirror_file_is_ignored() {
    const DEV_README: &str = "https://github.com/org/repo/blob/dev/README.md";
    let ws = Workspace::new();
    ws.write(
        "guide.md",
        &format!("Pick [main]({REPO_README}) or [dev]({DEV_README}).\n"),
    );

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher
        .expect_fetch()
        .withf(|url: &str| url == RAW_README)
        .times(1)
        .returning(|_| Ok(b"# Main\n".to_vec()));
    fetcher
        .expect_fetch()
        .withf(|url: &str| url.contains("/dev/"))
        .never();

    let config = ws.config(&[("repo", "libraries/repo")], false);
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation should succeed");

    assert_eq!(report.fetches, 1);
    assert_eq!(read(ws.mirror.join("libraries/repo/index.md")), "# Main\n");
    assert_eq!(
        report.diagnostics.ignored.get(DEV_README).map(String::as_str),
        Some(DEV_README)
    );

    let guide_doc = ws.mirror.join("guide.md");
    assert_eq!(
        report
            .changes
            .occurrences(&guide_doc, LinkKind::Transferred, REPO_README),
        1
    );
    assert_eq!(
        report
            .changes
            .occurrences(&guide_doc, LinkKind::Transferred, DEV_README),
        0
    );

    let guide = read(ws.output.join("guide.html"));
    assert!(guide.contains("href=\"./libraries/repo/index.html\""), "{guide}");
    assert!(guide.contains(&format!("href=\"{DEV_README}\"")), "{guide}");
}

#[tokio::test]
async fn test_link_escaping_the_tree_points_at_its_remote() {
    let ws = Workspace::new();
    ws.write(
        "index.md",
        "[x](https://github.com/org/repo/blob/main/guide/x.md)\n",
    );

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher
        .expect_fetch()
        .withf(|url: &str| url == "https://raw.example.test/org/repo/main/guide/x.md")
        .times(1)
        .returning(|_| Ok(b"[y](../../other.md)\n".to_vec()));

    let config = ws.config(&[("repo", "docs")], false);
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation should succeed");

    assert_eq!(report.fetches, 1);
    let mirrored = read(ws.mirror.join("docs/guide/x.md"));
    assert_eq!(mirrored, "[y](https://github.com/org/repo/blob/other.md)\n");
    let page = read(ws.output.join("docs/guide/x.html"));
    assert!(page.contains("href=\"https://github.com/org/repo/blob/other.md\""), "{page}");
}

#[tokio::test]
async fn test_original_is_never_overwritten() {
    let ws = Workspace::new();
    ws.write("guide.md", &format!("See [z]({REPO_README}).\n"));
    ws.write("libraries/repo/index.md", "# Written by hand\n");

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher.expect_fetch().never();

    let config = ws.config(&[("repo", "libraries/repo")], true);
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation should succeed");

    assert_eq!(report.fetches, 0);
    assert_eq!(
        report.diagnostics.aborted.get(REPO_README).map(String::as_str),
        Some(REPO_README)
    );
    assert_eq!(read(ws.mirror.join("libraries/repo/index.md")), "# Written by hand\n");
    // Unresolved links keep pointing at the remote.
    let guide = read(ws.output.join("guide.html"));
    assert!(guide.contains(&format!("href=\"{REPO_README}\"")), "{guide}");
}

#[tokio::test]
async fn test_missing_remote_is_reported_broken() {
    let ws = Workspace::new();
    ws.write("guide.md", &format!("See [z]({REPO_README}).\n"));

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|url: &str| Err(FetchError::NotFound(url.to_string())));

    let config = ws.config(&[("repo", "libraries/repo")], false);
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation completes despite broken links");

    assert_eq!(
        report.diagnostics.broken.get(RAW_README).map(String::as_str),
        Some(REPO_README)
    );
    assert!(!ws.mirror.join("libraries/repo/index.md").exists());
    let guide = read(ws.output.join("guide.html"));
    assert!(guide.contains(&format!("href=\"{REPO_README}\"")), "{guide}");
}

#[tokio::test]
async fn test_transient_failures_are_collected() {
    let ws = Workspace::new();
    ws.write("guide.md", &format!("See [z]({REPO_README}).\n"));

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher.expect_fetch().times(1).returning(|url: &str| {
        Err(FetchError::Status {
            url: url.to_string(),
            status: 502,
        })
    });

    let config = ws.config(&[("repo", "libraries/repo")], false);
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation completes despite fetch failures");

    assert!(report.diagnostics.failed.contains_key(RAW_README));
    assert!(report.diagnostics.broken.is_empty());
}

#[tokio::test]
async fn test_unresolvable_links_are_classified() {
    let ws = Workspace::new();
    ws.write(
        "index.md",
        "[mail](mailto:team@example.org)\n[notes](notes)\n[top](#top)\n[paper](https://example.org/paper.md)\n[gone](https://github.com/org/unknown/blob/main/a.md)\n",
    );

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().never();
    fetcher.expect_fetch().never();

    let config = ws.config(&[("repo", "libraries/repo")], false);
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation should succeed");

    let diagnostics = &report.diagnostics;
    assert!(diagnostics.unsupported.contains_key("mailto:team@example.org"));
    assert!(diagnostics.invalid.contains_key("notes"));
    assert!(diagnostics.unmatched.contains_key("https://example.org/paper.md"));
    // No destination is mapped for this repository.
    assert!(diagnostics
        .unmatched
        .contains_key("https://github.com/org/unknown/blob/main/a.md"));
    assert!(!diagnostics.invalid.contains_key(""));
}

#[tokio::test]
async fn test_own_repository_links_point_at_the_source() {
    let ws = Workspace::new();
    let own = "https://github.com/org/handbook/blob/main/source/intro.md";
    ws.write("guide.md", &format!("Read the [intro]({own}).\n"));
    ws.write("intro.md", "# Intro\n");

    let mut fetcher = MockFetcher::new();
    fetcher.expect_probe().returning(|_| Ok(true));
    fetcher.expect_fetch().never();

    let mut config = ws.config(&[("handbook", "self")], true);
    config.repository = Some("github.com/org/handbook".to_string());
    let report = generate(&config, Arc::new(fetcher))
        .await
        .expect("generation should succeed");

    assert_eq!(report.fetches, 0);
    assert!(report.diagnostics.is_clean(), "{:?}", report.diagnostics);
    assert_eq!(
        report
            .changes
            .occurrences(&ws.mirror.join("guide.md"), LinkKind::Internal, own),
        1
    );
    let guide = read(ws.output.join("guide.html"));
    assert!(guide.contains("href=\"./intro.html\""), "{guide}");
    assert!(!ws.mirror.join("self").exists());
}

#[tokio::test]
async fn test_missing_source_is_fatal() {
    let ws = Workspace::new();
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().never();

    let err = generate(&ws.config(&[], false), Arc::new(fetcher))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{err}");
}
