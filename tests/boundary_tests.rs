use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_boundary_numerical_values() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("boundary_test.csv");
    let mut wtr = csv::Writer::from_path(&output_path).unwrap();
    wtr.write_record(["type", "owner", "currency", "from", "to", "amount"])
        .unwrap();

    // i64::MAX = 9223372036854775807
    wtr.write_record(["open", "alice", "USD", "", "", "9223372036854775807"])
        .unwrap();
    wtr.write_record(["open", "bob", "USD", "", "", "0"]).unwrap();
    wtr.write_record(["transfer", "", "", "1", "2", "9223372036854775807"])
        .unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("bankledger"));
    cmd.arg(&output_path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("id,owner,currency,balance"))
        .stdout(predicate::str::contains("1,alice,USD,0"))
        .stdout(predicate::str::contains("2,bob,USD,9223372036854775807"));
}

#[test]
fn test_overflowing_credit_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("overflow_test.csv");
    let mut wtr = csv::Writer::from_path(&output_path).unwrap();
    wtr.write_record(["type", "owner", "currency", "from", "to", "amount"])
        .unwrap();

    wtr.write_record(["open", "alice", "USD", "", "", "1"]).unwrap();
    wtr.write_record(["open", "bob", "USD", "", "", "9223372036854775807"])
        .unwrap();
    wtr.write_record(["transfer", "", "", "1", "2", "1"]).unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("bankledger"));
    cmd.arg(&output_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Balance overflow"))
        .stdout(predicate::str::contains("1,alice,USD,1"))
        .stdout(predicate::str::contains("2,bob,USD,9223372036854775807"));
}
