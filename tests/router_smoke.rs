mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request_err_code, request_ok, spawn_sidecar, temp_dir};

#[test]
fn health_and_workspace_gating() {
    let workspace = temp_dir("readingd-router");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("workspacePath"), Some(&json!(null)));
    assert_eq!(health.get("catalogVersion"), Some(&json!(1)));
    assert_eq!(health.get("batchAtomicity"), Some(&json!("per_category")));

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "progress.get",
        json!({ "studentId": "anyone" }),
    );
    assert_eq!(code, "no_workspace");

    let code = request_err_code(&mut stdin, &mut reader, "3", "workspace.select", json!({}));
    assert_eq!(code, "bad_params");

    let code = request_err_code(&mut stdin, &mut reader, "4", "grades.compute", json!({}));
    assert_eq!(code, "not_implemented");

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        selected
            .pointer("/catalog/categories")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(5)
    );
    assert_eq!(selected.pointer("/catalog/categories/4/locked"), Some(&json!(true)));

    let health = request_ok(&mut stdin, &mut reader, "6", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()).map(str::to_string),
        Some(workspace.to_string_lossy().to_string())
    );
}

#[test]
fn bad_json_line_gets_error_without_id() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(value.get("ok"), Some(&json!(false)));
    assert_eq!(value.pointer("/error/code"), Some(&json!("bad_json")));

    // The loop keeps serving afterwards.
    let _ = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));
}

#[test]
fn broken_config_is_rejected_and_keeps_previous_workspace() {
    let good = temp_dir("readingd-config-good");
    let bad = temp_dir("readingd-config-bad");
    std::fs::write(
        bad.join("readingd.toml"),
        "batch_atomicity = \"sometimes\"\n",
    )
    .expect("write config");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": good.to_string_lossy() }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": bad.to_string_lossy() }),
    );
    assert_eq!(code, "config_invalid");

    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()).map(str::to_string),
        Some(good.to_string_lossy().to_string())
    );
}

#[test]
fn content_lookup_and_level_recommendations() {
    let workspace = temp_dir("readingd-content");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "content.put",
        json!({ "collection": "letters", "contentId": "64f0c2", "data": { "letterID": "m", "sound": "/m/" } }),
    );
    let by_primary = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "content.get",
        json!({ "collection": "letters", "contentId": "64f0c2" }),
    );
    assert_eq!(by_primary.pointer("/item/sound"), Some(&json!("/m/")));
    let by_natural = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "content.get",
        json!({ "collection": "letters", "contentId": "m" }),
    );
    assert_eq!(by_natural.pointer("/item/id"), Some(&json!("64f0c2")));
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "content.get",
        json!({ "collection": "letters", "contentId": "q" }),
    );
    assert_eq!(code, "not_found");

    let rec = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "content.recommendedCategories",
        json!({ "readingLevel": "High Emerging" }),
    );
    assert_eq!(rec.get("categoryIds"), Some(&json!([2, 3, 4])));
    assert_eq!(rec.pointer("/categories/0/categoryName"), Some(&json!("Phonological Awareness")));
    let rec = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "content.recommendedCategories",
        json!({ "readingLevel": "At Grade Level" }),
    );
    assert_eq!(rec.get("categoryIds"), Some(&json!([5])));
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "8",
        "content.recommendedCategories",
        json!({ "readingLevel": "Fluent" }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn assignment_parameter_errors() {
    let workspace = temp_dir("readingd-assign-params");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "students.upsert", json!({ "id": "stu-x" }));

    let cases = [
        json!({ "readingLevel": "Low Emerging", "categories": [1] }),
        json!({ "studentId": "  ", "readingLevel": "Low Emerging", "categories": [1] }),
        json!({ "studentId": "stu-x", "categories": [1] }),
        json!({ "studentId": "stu-x", "readingLevel": "Low Emerging", "categories": [] }),
        json!({ "studentId": "stu-x", "readingLevel": "Low Emerging", "categories": [{ "categoryName": "x" }] }),
        json!({ "studentId": "stu-x", "readingLevel": "Low Emerging", "categories": [1], "customizations": [] }),
        json!({ "studentId": "stu-x", "readingLevel": "Low Emerging", "categories": [{ "categoryId": 6, "categoryName": "Fluency" }] }),
    ];
    for (i, params) in cases.into_iter().enumerate() {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            &format!("c{i}"),
            "assignments.assign",
            params,
        );
        assert_eq!(code, "bad_params", "case {i}");
    }

    // Nothing above reached the progress ledger.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2b",
        "progress.get",
        json!({ "studentId": "stu-x" }),
    );
    assert_eq!(code, "not_found");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.assign",
        json!({ "studentId": "nobody", "readingLevel": "Low Emerging", "categories": [1] }),
    );
    assert_eq!(code, "not_found");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "students.get",
        json!({ "studentId": "nobody" }),
    );
    assert_eq!(code, "not_found");
}
