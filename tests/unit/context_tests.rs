//! Unit tests for the workspace context provider.

use std::fs;

use agent_conductor::context::{resolve_chat_path, ContextProvider, WorkspaceContext};
use agent_conductor::models::session::Session;
use agent_conductor::AppError;

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
    fs::write(dir.path().join("README.md"), "# Demo").unwrap();
    dir
}

#[test]
fn resolves_relative_and_absolute_paths_inside_root() {
    let dir = workspace();
    assert_eq!(resolve_chat_path(dir.path(), "src/lib.rs").unwrap(), "src/lib.rs");
    assert_eq!(resolve_chat_path(dir.path(), "./src/../README.md").unwrap(), "README.md");

    let absolute = dir.path().join("src/lib.rs");
    assert_eq!(
        resolve_chat_path(dir.path(), absolute.to_str().unwrap()).unwrap(),
        "src/lib.rs"
    );
}

#[test]
fn rejects_missing_directories_and_outside_paths() {
    let dir = workspace();
    let outside = tempfile::NamedTempFile::new().unwrap();

    assert!(matches!(
        resolve_chat_path(dir.path(), "nope.rs"),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        resolve_chat_path(dir.path(), "src"),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        resolve_chat_path(dir.path(), outside.path().to_str().unwrap()),
        Err(AppError::Session(_))
    ));
}

#[test]
fn renders_chat_files_and_reuses_cache_until_files_change() {
    let dir = workspace();
    let provider = WorkspaceContext::default();
    let mut session = Session::new("s", dir.path(), true);
    session.add_chat_file("src/lib.rs");

    let first = provider.generate(&mut session, None).unwrap();
    assert!(first.contains("## File: src/lib.rs"));
    assert!(first.contains("pub fn answer()"));
    assert!(session.is_cache_valid());

    let second = provider.generate(&mut session, None).unwrap();
    assert_eq!(first, second);

    fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u64 { 4242 }\n").unwrap();
    let third = provider.generate(&mut session, None).unwrap();
    assert!(third.contains("4242"));
}

#[test]
fn fresh_prompt_mentions_become_chat_files() {
    let dir = workspace();
    let provider = WorkspaceContext::default();
    let mut session = Session::new("s", dir.path(), true);

    let context = provider
        .generate(&mut session, Some("please update @README.md, not @missing.txt"))
        .unwrap();

    assert_eq!(session.chat_files(), ["README.md".to_owned()]);
    assert!(context.contains("# Demo"));
}

#[test]
fn history_overrides_skip_mention_expansion() {
    let dir = workspace();
    let provider = WorkspaceContext::default();
    let mut session = Session::new("s", dir.path(), true);

    let context = provider.generate(&mut session, None).unwrap();
    assert!(context.is_empty());
    assert!(session.chat_files().is_empty());
}

#[test]
fn oversized_files_are_summarised() {
    let dir = workspace();
    let provider = WorkspaceContext::with_max_file_bytes(4);
    let mut session = Session::new("s", dir.path(), true);
    session.add_chat_file("src/lib.rs");

    let context = provider.generate(&mut session, None).unwrap();
    assert!(context.contains("<file too large"));
    assert!(!context.contains("answer"));
}
