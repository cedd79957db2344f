use std::path::{Path, PathBuf};

use ajom_adapters::{
    adapter_for_source, AdapterContext, FetchedPage, INDEED_SOURCE_ID, PRACUJ_SOURCE_ID,
    ROCKETJOBS_SOURCE_ID,
};
use chrono::NaiveDate;
use uuid::Uuid;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn fixture_page(slug: &str) -> FetchedPage {
    let path = workspace_root()
        .join("fixtures")
        .join(slug)
        .join("sample")
        .join("listing.html");
    FetchedPage {
        url: format!("fixture://{slug}/listing"),
        body: std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("reading {}: {e}", path.display())),
    }
}

fn ctx() -> AdapterContext {
    AdapterContext {
        run_id: Uuid::new_v4(),
        today: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
    }
}

#[test]
fn pracuj_listing_extracts_offer_cards() {
    let adapter = adapter_for_source(PRACUJ_SOURCE_ID).unwrap();
    let records = adapter
        .parse_listing(&fixture_page("pracuj-pl"), &ctx())
        .unwrap();

    assert_eq!(records.len(), 3);

    assert_eq!(records[0].job_title, "Główny Księgowy");
    assert_eq!(records[0].company, "Biuro Rachunkowe Alfa Sp. z o.o.");
    assert_eq!(
        records[0].job_url,
        "https://www.pracuj.pl/praca/glowny-ksiegowy-warszawa,oferta,1000001"
    );
    assert_eq!(records[0].pub_date, "2024-03-01");
    assert_eq!(records[0].source, PRACUJ_SOURCE_ID);

    // Whitespace in markup collapses; relative "dzisiaj" resolves to the
    // run date; absolute hrefs pass through.
    assert_eq!(records[1].job_title, "Chief Accountant");
    assert_eq!(
        records[1].job_url,
        "https://www.pracuj.pl/praca/chief-accountant-krakow,oferta,1000002"
    );
    assert_eq!(records[1].pub_date, "2024-03-10");

    assert_eq!(records[2].pub_date, "2024-03-03");
}

#[test]
fn rocketjobs_listing_keeps_offer_anchors_only() {
    let adapter = adapter_for_source(ROCKETJOBS_SOURCE_ID).unwrap();
    let records = adapter
        .parse_listing(&fixture_page("rocketjobs-pl"), &ctx())
        .unwrap();

    assert_eq!(records.len(), 2);

    assert_eq!(records[0].job_title, "Główna Księgowa (Remote)");
    assert_eq!(records[0].company, "Gamma Soft");
    assert_eq!(
        records[0].job_url,
        "https://rocketjobs.pl/oferta/glowna-ksiegowa-remote"
    );
    assert_eq!(records[0].pub_date, "2024-03-10");

    assert_eq!(records[1].company, "Delta Sp. z o.o.");
    assert_eq!(
        records[1].job_url,
        "https://rocketjobs.pl/praca/chief-accountant-wroclaw"
    );
}

#[test]
fn indeed_listing_extracts_result_cards() {
    let adapter = adapter_for_source(INDEED_SOURCE_ID).unwrap();
    let records = adapter
        .parse_listing(&fixture_page("indeed-pl"), &ctx())
        .unwrap();

    assert_eq!(records.len(), 2);

    assert_eq!(records[0].job_title, "Główny Księgowy / Chief Accountant");
    assert_eq!(records[0].company, "Epsilon Accounting");
    assert_eq!(records[0].job_url, "https://pl.indeed.com/rc/clk?jk=abc123");
    assert_eq!(records[0].pub_date, "2024-03-02");

    assert_eq!(records[1].pub_date, "2024-03-09");
    assert_eq!(records[1].source, INDEED_SOURCE_ID);
}
