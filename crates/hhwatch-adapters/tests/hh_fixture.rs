use std::path::PathBuf;

use hhwatch_adapters::load_vacancies_fixture;
use hhwatch_core::merge_postings;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures/hh")
        .join(name)
}

#[test]
fn keyword_pages_merge_into_one_newest_first_list() {
    let python = load_vacancies_fixture(fixture("vacancies_python.json")).expect("python page");
    let java = load_vacancies_fixture(fixture("vacancies_java.json")).expect("java page");

    let merged = merge_postings(vec![python, java]);
    let ids: Vec<_> = merged.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["93020002", "93011234", "93009876", "92990001"]);
}
