mod test_support;

use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

fn count_completed(progress: &serde_json::Value) -> i64 {
    progress
        .get("categories")
        .and_then(|v| v.as_array())
        .map(|cats| {
            cats.iter()
                .filter(|c| c.get("status").and_then(|v| v.as_str()) == Some("completed"))
                .count() as i64
        })
        .unwrap_or(0)
}

#[test]
fn placeholder_assignment_then_empty_submission_flow() {
    let workspace = temp_dir("readingd-placeholder-flow");
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
        "students.upsert",
        json!({ "id": "S", "displayName": "Student S", "externalNo": 501 }),
    );

    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.assign",
        json!({
            "studentId": "S",
            "readingLevel": "Low Emerging",
            "categories": [{ "categoryId": 1, "categoryName": "Alphabet Knowledge" }]
        }),
    );
    let assignments = assigned
        .get("assignments")
        .and_then(|v| v.as_array())
        .expect("assignments");
    assert_eq!(assignments.len(), 1);
    let a = &assignments[0];
    let assessment_id = a
        .get("assessmentId")
        .and_then(|v| v.as_str())
        .expect("assessmentId")
        .to_string();
    assert!(assessment_id.starts_with("MA-1-"), "{}", assessment_id);
    assert_eq!(a.get("totalAssigned"), Some(&json!(1)));
    assert_eq!(a.get("completionCount"), Some(&json!(0)));
    assert_eq!(a.get("hasCustomization"), Some(&json!(false)));
    assert_eq!(a.get("customizedAssessmentId"), Some(&json!(null)));

    let template = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "templates.get",
        json!({ "templateId": assessment_id }),
    );
    assert_eq!(template.pointer("/template/isPlaceholder"), Some(&json!(true)));
    assert_eq!(template.pointer("/template/passingThreshold"), Some(&json!(75.0)));
    assert_eq!(
        template
            .pointer("/template/questions")
            .and_then(|v| v.as_array())
            .map(|q| q.len()),
        Some(0)
    );

    let response = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "responses.get",
        json!({ "assessmentId": assessment_id, "studentId": "S" }),
    );
    assert_eq!(response.pointer("/response/completed"), Some(&json!(false)));
    assert_eq!(response.pointer("/response/percentageScore"), Some(&json!(null)));
    assert_eq!(response.pointer("/response/attemptNumber"), Some(&json!(0)));

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "progress.get",
        json!({ "studentId": "S" }),
    );
    let cats = progress
        .pointer("/progress/categories")
        .and_then(|v| v.as_array())
        .expect("categories");
    assert_eq!(cats.len(), 5);
    assert_eq!(cats[0].get("status"), Some(&json!("in_progress")));
    assert_eq!(cats[0].get("preAssessmentCompleted"), Some(&json!(true)));
    assert_eq!(cats[0].get("mainAssessmentId"), Some(&json!(assessment_id)));
    assert_eq!(cats[1].get("status"), Some(&json!("pending")));
    assert_eq!(cats[4].get("status"), Some(&json!("locked")));
    assert_eq!(progress.pointer("/progress/completedCategories"), Some(&json!(0)));

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "responses.submit",
        json!({ "assessmentId": assessment_id, "studentId": "S", "answers": {} }),
    );
    assert_eq!(submitted.get("percentageScore"), Some(&json!(0.0)));
    assert_eq!(submitted.get("passed"), Some(&json!(false)));

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "progress.get",
        json!({ "studentId": "S" }),
    );
    let p = progress.get("progress").expect("progress");
    assert_eq!(p.pointer("/categories/0/status"), Some(&json!("in_progress")));
    assert_eq!(p.pointer("/categories/0/mainAssessmentCompleted"), Some(&json!(true)));
    assert_eq!(p.pointer("/categories/0/attemptCount"), Some(&json!(1)));
    assert_eq!(p.get("completedCategories"), Some(&json!(count_completed(p))));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assignments.list",
        json!({ "studentId": "S" }),
    );
    assert_eq!(listed.pointer("/assignments/0/students/0/status"), Some(&json!("completed")));
    assert_eq!(listed.pointer("/assignments/0/completionCount"), Some(&json!(1)));
    assert_eq!(listed.pointer("/assignments/0/completionRate"), Some(&json!(100.0)));

    let events = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "events.list",
        json!({ "studentId": "S" }),
    );
    assert_eq!(events.pointer("/events/0/kind"), Some(&json!("assessment_assigned")));
    assert_eq!(events.pointer("/events/0/payload/assessmentId"), Some(&json!(assessment_id)));
}

#[test]
fn repeated_assignment_reuses_the_placeholder_template() {
    let workspace = temp_dir("readingd-placeholder-idempotent");
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
        "students.upsert",
        json!({ "id": "stu-2" }),
    );

    let params = json!({
        "studentId": "stu-2",
        "readingLevel": "Developing",
        "categories": [{ "categoryId": 3, "categoryName": "Decoding" }]
    });
    let first = request_ok(&mut stdin, &mut reader, "3", "assignments.assign", params.clone());
    let second = request_ok(&mut stdin, &mut reader, "4", "assignments.assign", params);

    let first_id = first.pointer("/assignments/0/assessmentId").cloned();
    let second_id = second.pointer("/assignments/0/assessmentId").cloned();
    assert!(first_id.is_some());
    assert_eq!(first_id, second_id);
    assert_ne!(
        first.pointer("/assignments/0/id"),
        second.pointer("/assignments/0/id")
    );

    // Same (assessment, student) pair keeps a single ledger.
    let response = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "responses.get",
        json!({ "assessmentId": first_id, "studentId": "stu-2" }),
    );
    assert_eq!(
        response.pointer("/response/assignmentId"),
        second.pointer("/assignments/0/id")
    );

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "progress.get",
        json!({ "studentId": "stu-2" }),
    );
    assert_eq!(progress.pointer("/progress/categories/2/status"), Some(&json!("in_progress")));
    assert!(progress
        .pointer("/progress/categories/2/lastAttemptDate")
        .and_then(|v| v.as_str())
        .is_some());
}

#[test]
fn student_can_be_addressed_by_external_number() {
    let workspace = temp_dir("readingd-external-no");
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
        "students.upsert",
        json!({ "id": "stu-ext", "externalNo": 7001 }),
    );
    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.assign",
        json!({ "studentId": "7001", "readingLevel": "Low Emerging", "categories": [2] }),
    );
    assert_eq!(
        assigned.pointer("/assignments/0/students/0/userId"),
        Some(&json!("stu-ext"))
    );
    assert_eq!(
        assigned.pointer("/assignments/0/categoryName"),
        Some(&json!("Phonological Awareness"))
    );
}
