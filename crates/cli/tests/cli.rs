use assert_cmd::Command;

fn bookstore() -> Command {
    let mut cmd = Command::cargo_bin("bookstore").unwrap();
    cmd.env_remove("RUST_LOG")
        .env("BOOKSTORE_ENV", "local")
        .env("BOOKSTORE_CONFIG_DIR", env!("CARGO_MANIFEST_DIR"));
    cmd
}

#[test]
fn help_lists_subcommands() {
    let output = bookstore().arg("--help").assert().success().get_output().clone();
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("migrate"));
}

#[test]
fn migrate_applies_book_indexes_once() {
    let dir = tempfile::tempdir().unwrap();
    let uri = format!("file://{}", dir.path().display());

    let first = bookstore()
        .args(["migrate", "--database", &uri])
        .assert()
        .success()
        .get_output()
        .clone();
    assert!(String::from_utf8(first.stdout)
        .unwrap()
        .contains("applied books.001_book_indexes"));

    let second = bookstore()
        .args(["migrate", "--database", &uri])
        .assert()
        .success()
        .get_output()
        .clone();
    assert!(String::from_utf8(second.stdout)
        .unwrap()
        .contains("no pending migrations"));
}

#[test]
fn unknown_store_scheme_fails() {
    bookstore()
        .args(["migrate", "--database", "redis://localhost"])
        .assert()
        .failure();
}
