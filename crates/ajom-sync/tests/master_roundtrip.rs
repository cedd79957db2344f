use ajom_core::Record;
use ajom_storage::MasterStore;
use ajom_sync::merge;
use chrono::NaiveDate;
use tempfile::tempdir;

fn record(url: &str, title: &str, pub_date: &str) -> Record {
    Record {
        company: "Alfa".into(),
        job_title: title.into(),
        pub_date: pub_date.into(),
        job_url: url.into(),
        source: "pracuj.pl".into(),
        ..Record::default()
    }
}

#[tokio::test]
async fn two_consecutive_runs_converge_on_a_stable_master() {
    let dir = tempdir().expect("tempdir");
    let store = MasterStore::new(dir.path());
    let day_one = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
    let day_two = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();

    let scraped = vec![
        record("https://x/1", "Główny Księgowy", "2024-03-01"),
        record("https://x/2", "Chief Accountant", "01.03.2024"),
    ];

    // First run against empty state: everything is new.
    let master = store.load().await.expect("load");
    let (updated, new_today) = merge(master, scraped.clone());
    assert_eq!(new_today.len(), 2);

    store.save(&updated).await.expect("save");
    let delta_path = store
        .save_delta(&new_today, day_one)
        .await
        .expect("save_delta")
        .expect("delta written");
    assert!(delta_path.ends_with("new_offers_20240310.csv"));

    // Second run re-scrapes the same postings: nothing new, no delta,
    // master unchanged on disk.
    let master = store.load().await.expect("reload");
    let (updated, new_today) = merge(master.clone(), scraped);
    assert!(new_today.is_empty());
    assert_eq!(updated, master);

    store.save(&updated).await.expect("resave");
    let delta = store
        .save_delta(&new_today, day_two)
        .await
        .expect("save_delta");
    assert!(delta.is_none());
    assert!(!store.delta_path(day_two).exists());

    let final_master = store.load().await.expect("final load");
    assert_eq!(final_master.len(), 2);
    assert_eq!(final_master[1].pub_date, "2024-03-01");
}
