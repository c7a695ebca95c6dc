use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_malformed_csv_handling() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("robustness_test.csv");
    let mut wtr = csv::Writer::from_path(&output_path).unwrap();
    wtr.write_record(["type", "owner", "currency", "from", "to", "amount"])
        .unwrap();

    wtr.write_record(["open", "alice", "USD", "", "", "100"]).unwrap();
    wtr.write_record(["open", "bob", "USD", "", "", "0"]).unwrap();
    // Invalid type
    wtr.write_record(["refund", "", "", "1", "2", "1"]).unwrap();
    // Unsupported currency
    wtr.write_record(["open", "carol", "GBP", "", "", "1"]).unwrap();
    // Missing amount for transfer
    wtr.write_record(["transfer", "", "", "1", "2", ""]).unwrap();
    // Valid transfer
    wtr.write_record(["transfer", "", "", "1", "2", "30"]).unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("bankledger"));
    cmd.arg(&output_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading command"))
        .stderr(predicate::str::contains("Error processing command"))
        .stdout(predicate::str::contains("1,alice,USD,70"))
        .stdout(predicate::str::contains("2,bob,USD,30"))
        .stdout(predicate::str::contains("carol").not());
}

#[test]
fn test_invalid_data_types() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("data_type_test.csv");
    let mut wtr = csv::Writer::from_path(&output_path).unwrap();
    wtr.write_record(["type", "owner", "currency", "from", "to", "amount"])
        .unwrap();

    wtr.write_record(["open", "alice", "USD", "", "", "not_a_number"]).unwrap();
    wtr.write_record(["open", "alice", "USD", "", "", "5"]).unwrap();
    wtr.write_record(["open", "bob", "USD", "", "", "5"]).unwrap();
    // Non-integer account id
    wtr.write_record(["transfer", "", "", "abc", "2", "1"]).unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("bankledger"));
    cmd.arg(&output_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading command"))
        .stdout(predicate::str::contains("1,alice,USD,5"))
        .stdout(predicate::str::contains("2,bob,USD,5"));
}
