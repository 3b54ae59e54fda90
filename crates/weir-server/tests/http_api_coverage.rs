mod common;

use common::TestServer;
use reqwest::StatusCode;
use serde_json::json;

const COUNT_TICK: &str = "stream
    |from()
        .measurement('test')
    |window()
        .period(10s)
        .every(10s)
    |count('value')
    |httpOut('count')
";

const COUNT_POINTS: &str = "test value=1 0000000000
test value=1 0000000001
test value=1 0000000001
test value=1 0000000002
test value=1 0000000002
test value=1 0000000003
test value=1 0000000003
test value=1 0000000004
test value=1 0000000005
test value=1 0000000005
test value=1 0000000005
test value=1 0000000006
test value=1 0000000007
test value=1 0000000008
test value=1 0000000009
test value=1 0000000010
test value=1 0000000011
";

#[tokio::test(flavor = "multi_thread")]
async fn ping_responds_no_content() {
    let s = TestServer::start().await;
    let resp = s.client.get(s.url("/weir/v1/ping")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(resp.headers().contains_key("X-Weir-Version"));
}

#[tokio::test(flavor = "multi_thread")]
async fn create_task_returns_definition_and_dot() {
    let s = TestServer::start().await;
    let (status, task) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "testTaskID",
                "type": "stream",
                "dbrps": [{"db": "mydb", "rp": "myrp"}, {"db": "otherdb", "rp": "default"}],
                "script": "stream\n    |from()\n        .measurement('test')\n",
                "status": "disabled",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{task}");
    assert_eq!(task["id"], "testTaskID");
    assert_eq!(task["type"], "stream");
    assert_eq!(task["status"], "disabled");
    assert_eq!(task["executing"], false);
    assert_eq!(task["error"], "");
    assert_eq!(
        task["dot"],
        "digraph testTaskID {\nstream0 -> from1;\n}"
    );
    assert_eq!(task["dbrps"][0]["db"], "mydb");
    assert_eq!(task["link"]["href"], "/weir/v1/tasks/testTaskID");
}

#[tokio::test(flavor = "multi_thread")]
async fn enable_task_switches_dot_to_executing_form() {
    let s = TestServer::start().await;
    let (status, _) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "testTaskID",
                "type": "stream",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
                "script": "stream\n    |from()\n        .measurement('test')\n",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, task) = s
        .patch_json("/weir/v1/tasks/testTaskID", json!({"status": "enabled"}))
        .await;
    assert_eq!(status, StatusCode::OK, "{task}");
    assert_eq!(task["status"], "enabled");
    assert_eq!(task["executing"], true);
    let dot = task["dot"].as_str().unwrap();
    assert!(dot.contains("graph [throughput=\"0.00 points/s\"];"), "{dot}");
    assert!(dot.contains("stream0 [avg_exec_time_ns=\"0s\" ];"), "{dot}");
    assert!(dot.contains("stream0 -> from1 [processed=\"0\"];"), "{dot}");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_task_id_is_rejected_with_exact_message() {
    let s = TestServer::start().await;
    let (status, body) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "invalid id",
                "type": "stream",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
                "script": "stream\n    |from()\n",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "task ID must contain only letters, numbers, '-', '.' and '_'. \"invalid id\""
    );

    // Valid IDs from the whole accepted alphabet are fine.
    for id in ["anything", "12345", "tsk.2020-01", "Ñandú_1"] {
        let (status, body) = s
            .post_json(
                "/weir/v1/tasks",
                json!({
                    "id": id,
                    "type": "stream",
                    "dbrps": [{"db": "mydb", "rp": "myrp"}],
                    "script": "stream\n    |from()\n",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_task_counts_window() {
    let s = TestServer::start().await;
    let (status, _) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "testStreamTask",
                "type": "stream",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
                "script": COUNT_TICK,
                "status": "enabled",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Before any writes the endpoint serves the empty document.
    s.get_retry("/weir/v1/tasks/testStreamTask/count", "{}", 100).await;

    s.write("mydb", "myrp", COUNT_POINTS).await;

    s.get_retry(
        "/weir/v1/tasks/testStreamTask/count",
        r#"{"series":[{"name":"test","columns":["time","count"],"values":[["1970-01-01T00:00:10Z",15]]}]}"#,
        100,
    )
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn task_counters_track_mutations() {
    let s = TestServer::start().await;
    let mut enabled = 0u64;
    let count = 30u64;
    for i in 0..count {
        let status = if i % 3 == 0 {
            enabled += 1;
            "enabled"
        } else {
            "disabled"
        };
        let (code, body) = s
            .post_json(
                "/weir/v1/tasks",
                json!({
                    "id": format!("testTaskID-{i}"),
                    "type": "stream",
                    "dbrps": [{"db": "mydb", "rp": "myrp"}],
                    "script": "stream\n    |from()\n        .measurement('test')\n",
                    "status": status,
                }),
            )
            .await;
        assert_eq!(code, StatusCode::OK, "{body}");
    }
    let (_, vars) = s.get_json("/weir/v1/debug/vars").await;
    assert_eq!(vars["num_tasks"], count);
    assert_eq!(vars["num_enabled_tasks"], enabled);

    // Disable a few and delete a few, counters follow exactly.
    for i in 0..count {
        if i % 6 == 0 {
            let (code, _) = s
                .patch_json(
                    &format!("/weir/v1/tasks/testTaskID-{i}"),
                    json!({"status": "disabled"}),
                )
                .await;
            assert_eq!(code, StatusCode::OK);
            if i % 3 == 0 {
                enabled -= 1;
            }
        }
    }
    let mut remaining = count;
    for i in 0..count {
        if i % 5 == 0 {
            assert_eq!(
                s.delete(&format!("/weir/v1/tasks/testTaskID-{i}")).await,
                StatusCode::NO_CONTENT
            );
            remaining -= 1;
            if i % 3 == 0 && i % 6 != 0 {
                enabled -= 1;
            }
        }
    }
    let (_, vars) = s.get_json("/weir/v1/debug/vars").await;
    assert_eq!(vars["num_tasks"], remaining);
    assert_eq!(vars["num_enabled_tasks"], enabled);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_tasks_pattern_fields_offset_limit() {
    let s = TestServer::start().await;
    for i in 0..25 {
        let (code, _) = s
            .post_json(
                "/weir/v1/tasks",
                json!({
                    "id": format!("testTaskID{i}"),
                    "type": "stream",
                    "dbrps": [{"db": "mydb", "rp": "myrp"}],
                    "script": "stream\n    |from()\n        .measurement('test')\n",
                    "status": "enabled",
                }),
            )
            .await;
        assert_eq!(code, StatusCode::OK);
    }
    let (status, body) = s
        .get_json("/weir/v1/tasks?pattern=testTaskID1*&fields=type,status&offset=1&limit=5")
        .await;
    assert_eq!(status, StatusCode::OK);
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 5);
    for (i, task) in tasks.iter().enumerate() {
        // IDs sort lexicographically: testTaskID1, testTaskID10, ...
        assert_eq!(task["id"], format!("testTaskID1{i}"));
        assert_eq!(task["type"], "stream");
        assert_eq!(task["status"], "enabled");
        // Unrequested fields are absent.
        assert!(task.get("script").is_none());
        assert!(task.get("dot").is_none());
        assert!(task.get("dbrps").is_none());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rename_task_moves_the_record() {
    let s = TestServer::start().await;
    let (code, _) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "oldTaskID",
                "type": "stream",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
                "script": "stream\n    |from()\n",
            }),
        )
        .await;
    assert_eq!(code, StatusCode::OK);

    let (code, task) = s
        .patch_json("/weir/v1/tasks/oldTaskID", json!({"id": "newTaskID"}))
        .await;
    assert_eq!(code, StatusCode::OK, "{task}");
    assert_eq!(task["id"], "newTaskID");
    assert_eq!(task["link"]["href"], "/weir/v1/tasks/newTaskID");

    let (code, _) = s.get_json("/weir/v1/tasks/oldTaskID").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    let (code, _) = s.get_json("/weir/v1/tasks/newTaskID").await;
    assert_eq!(code, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn template_task_missing_var_message() {
    let s = TestServer::start().await;
    let template = "var field string
stream
    |from()
        .measurement('test')
    |window()
        .period(10s)
        .every(10s)
    |count(field)
    |httpOut('count')
";
    let (code, body) = s
        .post_json(
            "/weir/v1/templates",
            json!({"id": "testStreamTemplate", "type": "stream", "script": template}),
        )
        .await;
    assert_eq!(code, StatusCode::OK, "{body}");
    assert_eq!(body["link"]["href"], "/weir/v1/templates/testStreamTemplate");

    // Instantiating with no value for `field` fails with the documented
    // message.
    let (code, body) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "testStreamTask",
                "template-id": "testStreamTemplate",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
            }),
        )
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "invalid TICKscript: missing value for var \"field\"."
    );

    // With the var provided the task works end to end.
    let (code, body) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "testStreamTask",
                "template-id": "testStreamTemplate",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
                "vars": {"field": {"type": "string", "value": "value"}},
                "status": "enabled",
            }),
        )
        .await;
    assert_eq!(code, StatusCode::OK, "{body}");
    s.write("mydb", "myrp", COUNT_POINTS).await;
    s.get_retry(
        "/weir/v1/tasks/testStreamTask/count",
        r#"{"series":[{"name":"test","columns":["time","count"],"values":[["1970-01-01T00:00:10Z",15]]}]}"#,
        100,
    )
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn template_update_rolls_back_on_failure() {
    let s = TestServer::start().await;
    let tick_correct = "var field string
stream
    |from()
        .measurement('test')
    |window()
        .period(10s)
        .every(10s)
    |count(field)
    |httpOut('count')
";
    let tick_new_var = "var field string
var period duration
stream
    |from()
        .measurement('test')
    |window()
        .period(period)
        .every(period)
    |count(field)
    |httpOut('count')
";
    let (code, _) = s
        .post_json(
            "/weir/v1/templates",
            json!({"id": "testStreamTemplate", "type": "stream", "script": tick_correct}),
        )
        .await;
    assert_eq!(code, StatusCode::OK);
    for i in 0..5 {
        let (code, body) = s
            .post_json(
                "/weir/v1/tasks",
                json!({
                    "id": format!("testStreamTask-{i}"),
                    "template-id": "testStreamTemplate",
                    "dbrps": [{"db": "mydb", "rp": "myrp"}],
                    "vars": {"field": {"type": "string", "value": "value"}},
                }),
            )
            .await;
        assert_eq!(code, StatusCode::OK, "{body}");
    }

    // The new script needs a var the tasks do not define: the update fails
    // naming the first task, and every task keeps the old script.
    let (code, body) = s
        .patch_json(
            "/weir/v1/templates/testStreamTemplate",
            json!({"script": tick_new_var}),
        )
        .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "error reloading associated task testStreamTask-0: missing value for var \"period\"."
    );
    for i in 0..5 {
        let (_, task) = s
            .get_json(&format!("/weir/v1/tasks/testStreamTask-{i}"))
            .await;
        assert_eq!(task["script"], tick_correct);
    }

    // After adding the var to every task the update goes through.
    for i in 0..5 {
        let (code, _) = s
            .patch_json(
                &format!("/weir/v1/tasks/testStreamTask-{i}"),
                json!({"vars": {
                    "field": {"type": "string", "value": "value"},
                    "period": {"type": "duration", "value": "10s"},
                }}),
            )
            .await;
        assert_eq!(code, StatusCode::OK);
    }
    let (code, _) = s
        .patch_json(
            "/weir/v1/templates/testStreamTemplate",
            json!({"script": tick_new_var}),
        )
        .await;
    assert_eq!(code, StatusCode::OK);
    for i in 0..5 {
        let (_, task) = s
            .get_json(&format!("/weir/v1/tasks/testStreamTask-{i}"))
            .await;
        assert_eq!(task["script"], tick_new_var);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn template_delete_requires_no_linked_tasks() {
    let s = TestServer::start().await;
    let (code, _) = s
        .post_json(
            "/weir/v1/templates",
            json!({"id": "tmpl", "type": "stream", "script": "stream\n    |from()\n"}),
        )
        .await;
    assert_eq!(code, StatusCode::OK);
    let (code, _) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "linked",
                "template-id": "tmpl",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
            }),
        )
        .await;
    assert_eq!(code, StatusCode::OK);

    let resp = s
        .client
        .delete(s.url("/weir/v1/templates/tmpl"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(s.delete("/weir/v1/tasks/linked").await, StatusCode::NO_CONTENT);
    assert_eq!(s.delete("/weir/v1/templates/tmpl").await, StatusCode::NO_CONTENT);
}

#[tokio::test(flavor = "multi_thread")]
async fn anonymous_alert_topic_lifecycle_and_restart() {
    let mut s = TestServer::start().await;
    let tick = "stream
    |from()
        .measurement('alert')
    |alert()
        .id('id')
        .message('message')
        .details('details')
        .warn(lambda: \"value\" <= 1.0)
        .crit(lambda: \"value\" > 1.0)
";
    let (code, body) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "testAlertHandlers",
                "type": "stream",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
                "script": tick,
                "status": "enabled",
            }),
        )
        .await;
    assert_eq!(code, StatusCode::OK, "{body}");

    s.write("mydb", "myrp", "alert value=1 0000000000").await;

    let topic = "main:testAlertHandlers:alert2";
    let events_path = format!("/weir/v1preview/alerts/topics/{topic}/events");
    let (code, events) = s.get_json(&events_path).await;
    assert_eq!(code, StatusCode::OK, "{events}");
    assert_eq!(events["topic"], topic);
    let event = &events["events"][0];
    assert_eq!(event["id"], "id");
    assert_eq!(event["state"]["message"], "message");
    assert_eq!(event["state"]["details"], "details");
    assert_eq!(event["state"]["level"], "WARNING");
    assert_eq!(event["state"]["duration"], 0);
    assert_eq!(event["state"]["time"], "1970-01-01T00:00:00Z");

    // A restart preserves the topic and its events.
    s.restart().await;
    let (code, events) = s.get_json(&events_path).await;
    assert_eq!(code, StatusCode::OK, "{events}");
    assert_eq!(events["events"][0]["state"]["level"], "WARNING");

    // Disabling the task hides the topic.
    let (code, _) = s
        .patch_json("/weir/v1/tasks/testAlertHandlers", json!({"status": "disabled"}))
        .await;
    assert_eq!(code, StatusCode::OK);
    let (code, body) = s.get_json(&events_path).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(
        body["error"],
        format!("topic {topic:?} does not exist")
    );

    // Re-enabling restores it, state intact.
    let (code, _) = s
        .patch_json("/weir/v1/tasks/testAlertHandlers", json!({"status": "enabled"}))
        .await;
    assert_eq!(code, StatusCode::OK);
    let (code, events) = s.get_json(&events_path).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(events["events"][0]["id"], "id");

    // Deleting the task removes the topic for good.
    assert_eq!(
        s.delete("/weir/v1/tasks/testAlertHandlers").await,
        StatusCode::NO_CONTENT
    );
    let (code, _) = s.get_json(&events_path).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_crud_with_patch_and_put() {
    let mut s = TestServer::start().await;
    let (code, handler) = s
        .post_json(
            "/weir/v1preview/alerts/handlers",
            json!({
                "id": "myhandler",
                "topics": ["system", "test"],
                "actions": [{"kind": "slack", "options": {"channel": "#test"}}],
            }),
        )
        .await;
    assert_eq!(code, StatusCode::OK, "{handler}");
    assert_eq!(
        handler["link"]["href"],
        "/weir/v1preview/alerts/handlers/myhandler"
    );
    assert_eq!(handler["topics"], json!(["system", "test"]));
    assert_eq!(handler["actions"][0]["options"]["channel"], "#test");

    // PATCH: drop the first topic, point the channel elsewhere.
    let (code, handler) = s
        .patch_json(
            "/weir/v1preview/alerts/handlers/myhandler",
            json!([
                {"op": "remove", "path": "/topics/0"},
                {"op": "replace", "path": "/actions/0/options/channel", "value": "#weir_test"},
            ]),
        )
        .await;
    assert_eq!(code, StatusCode::OK, "{handler}");
    assert_eq!(handler["topics"], json!(["test"]));
    assert_eq!(handler["actions"][0]["options"]["channel"], "#weir_test");

    // PUT with a new ID moves the handler.
    let resp = s
        .client
        .put(s.url("/weir/v1preview/alerts/handlers/myhandler"))
        .json(&json!({
            "id": "newid",
            "topics": ["test"],
            "actions": [{"kind": "smtp", "options": {"to": ["oncall@example.com"]}}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (code, _) = s.get_json("/weir/v1preview/alerts/handlers/myhandler").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    let (code, handler) = s.get_json("/weir/v1preview/alerts/handlers/newid").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(handler["actions"][0]["kind"], "smtp");

    // Handlers survive a restart.
    s.restart().await;
    let (code, handler) = s.get_json("/weir/v1preview/alerts/handlers/newid").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(handler["id"], "newid");

    assert_eq!(
        s.delete("/weir/v1preview/alerts/handlers/newid").await,
        StatusCode::NO_CONTENT
    );
    let (code, _) = s.get_json("/weir/v1preview/alerts/handlers/newid").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_post_options_are_redacted() {
    let s = TestServer::start().await;
    let (code, handler) = s
        .post_json(
            "/weir/v1preview/alerts/handlers",
            json!({
                "id": "posting",
                "topics": ["test"],
                "actions": [{"kind": "post", "options": {"url": "http://example.com/hook"}}],
            }),
        )
        .await;
    assert_eq!(code, StatusCode::OK, "{handler}");
    assert_eq!(handler["actions"][0]["options"]["url"], true);
    assert_eq!(handler["actions"][0]["redacted"], json!(["url"]));

    let (_, listing) = s.get_json("/weir/v1preview/alerts/handlers").await;
    let body = listing.to_string();
    assert!(
        !body.contains("example.com"),
        "plaintext url leaked: {body}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn config_sections_round_trip_with_redaction() {
    let s = TestServer::start_with(|c| {
        c.upstream = vec![weir_server::config::UpstreamConfig {
            name: "default".to_string(),
            urls: vec!["http://127.0.0.1:8086".to_string()],
            username: "bob".to_string(),
            password: "secret".to_string(),
            enabled: true,
            default: true,
            timeout_secs: 5,
        }];
    })
    .await;

    let (code, config) = s.get_json("/weir/v1/config").await;
    assert_eq!(code, StatusCode::OK);
    let upstream = &config["sections"]["upstream"]["elements"][0];
    assert_eq!(upstream["options"]["username"], "bob");
    // The password never appears in plaintext.
    assert_eq!(upstream["options"]["password"], true);
    assert_eq!(upstream["redacted"], json!(["password"]));
    assert!(!config.to_string().contains("secret"));

    // Update the urls and read them back from the element endpoint.
    let (code, _) = s
        .post_json(
            "/weir/v1/config/upstream/default",
            json!({"set": {"urls": ["http://192.0.2.0:8086"]}}),
        )
        .await;
    assert_eq!(code, StatusCode::NO_CONTENT);
    let (_, element) = s.get_json("/weir/v1/config/upstream/default").await;
    assert_eq!(element["options"]["urls"], json!(["http://192.0.2.0:8086"]));

    // Delete reverts to the compiled default.
    let (code, _) = s
        .post_json(
            "/weir/v1/config/upstream/default",
            json!({"delete": ["urls"]}),
        )
        .await;
    assert_eq!(code, StatusCode::NO_CONTENT);
    let (_, element) = s.get_json("/weir/v1/config/upstream/default").await;
    assert_eq!(element["options"]["urls"], json!(["http://127.0.0.1:8086"]));

    // Add a second element to the multi-element section.
    let (code, _) = s
        .post_json(
            "/weir/v1/config/upstream",
            json!({"add": {"name": "new", "urls": ["http://127.0.0.1:8087"]}}),
        )
        .await;
    assert_eq!(code, StatusCode::NO_CONTENT);
    let (_, section) = s.get_json("/weir/v1/config/upstream").await;
    assert_eq!(section["elements"].as_array().unwrap().len(), 2);
    assert_eq!(
        s.delete("/weir/v1/config/upstream/new").await,
        StatusCode::NO_CONTENT
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn service_tests_list_and_disabled_transport() {
    let s = TestServer::start().await;
    let (code, services) = s.get_json("/weir/v1/service-tests").await;
    assert_eq!(code, StatusCode::OK);
    let names: Vec<&str> = services["services"]
        .as_array()
        .unwrap()
        .iter()
        .map(|svc| svc["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["exec", "log", "post", "slack", "smtp", "tcp", "upstream"]
    );

    let (code, result) = s
        .post_json("/weir/v1/service-tests/slack", json!({}))
        .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(result["success"], false);
    assert_eq!(result["message"], "service is not enabled");

    let (code, services) = s.get_json("/weir/v1/service-tests?pattern=s*").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(services["services"].as_array().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn record_and_replay_stream_reproduces_alerts() {
    let s = TestServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let log_path = tmp.path().join("alert.log");
    let tick = format!(
        "stream
    |from()
        .measurement('test')
    |window()
        .period(10s)
        .every(10s)
    |count('value')
    |alert()
        .id('test-count')
        .message('{{{{ .ID }}}} got: {{{{ index .Fields \"count\" }}}}')
        .crit(lambda: TRUE)
        .log('{}')
",
        log_path.display()
    );
    let (code, body) = s
        .post_json(
            "/weir/v1/tasks",
            json!({
                "id": "testStreamTask",
                "type": "stream",
                "dbrps": [{"db": "mydb", "rp": "myrp"}],
                "script": tick,
                "status": "disabled",
            }),
        )
        .await;
    assert_eq!(code, StatusCode::OK, "{body}");

    let (code, recording) = s
        .post_json(
            "/weir/v1/recordings/stream",
            json!({
                "id": "recordingid",
                "task": "testStreamTask",
                "stop": "1970-01-01T00:00:10Z",
            }),
        )
        .await;
    assert_eq!(code, StatusCode::CREATED, "{recording}");
    assert_eq!(
        recording["link"]["href"],
        "/weir/v1/recordings/recordingid"
    );

    s.write("mydb", "myrp", COUNT_POINTS).await;

    // Wait for the recording to finish.
    let mut status = "running".to_string();
    for _ in 0..100 {
        let (_, rec) = s.get_json("/weir/v1/recordings/recordingid").await;
        status = rec["status"].as_str().unwrap_or_default().to_string();
        if status != "running" {
            assert_eq!(rec["error"], "");
            assert!(rec["size"].as_i64().unwrap_or(0) > 0);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, "finished");

    let (code, replay) = s
        .post_json(
            "/weir/v1/replays",
            json!({
                "id": "replayid",
                "task": "testStreamTask",
                "recording": "recordingid",
                "clock": "fast",
                "recording-time": true,
            }),
        )
        .await;
    assert_eq!(code, StatusCode::CREATED, "{replay}");
    assert_eq!(replay["link"]["href"], "/weir/v1/replays/replayid");
    assert_eq!(replay["task"], "testStreamTask");

    let mut status = "running".to_string();
    for _ in 0..100 {
        let (_, rep) = s.get_json("/weir/v1/replays/replayid").await;
        status = rep["status"].as_str().unwrap_or_default().to_string();
        if status != "running" {
            assert_eq!(rep["error"], "");
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status, "finished");

    // The alert fired with the recorded timestamps.
    let contents = std::fs::read_to_string(&log_path).expect("alert log");
    let line: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(line["id"], "test-count");
    assert_eq!(line["message"], "test-count got: 15");
    assert_eq!(line["level"], "CRITICAL");
    assert_eq!(line["time"], "1970-01-01T00:00:10Z");
    assert_eq!(
        line["data"]["series"][0]["values"][0],
        json!(["1970-01-01T00:00:10Z", 15])
    );

    // Listing and deleting recordings and replays.
    let (_, recordings) = s.get_json("/weir/v1/recordings").await;
    assert_eq!(recordings["recordings"].as_array().unwrap().len(), 1);
    assert_eq!(
        s.delete("/weir/v1/recordings/recordingid").await,
        StatusCode::NO_CONTENT
    );
    let (_, recordings) = s.get_json("/weir/v1/recordings").await;
    assert_eq!(recordings["recordings"].as_array().unwrap().len(), 0);

    let (_, replays) = s.get_json("/weir/v1/replays").await;
    assert_eq!(replays["replays"].as_array().unwrap().len(), 1);
    assert_eq!(
        s.delete("/weir/v1/replays/replayid").await,
        StatusCode::NO_CONTENT
    );
    let (_, replays) = s.get_json("/weir/v1/replays").await;
    assert_eq!(replays["replays"].as_array().unwrap().len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn tasks_survive_restart_with_status() {
    let mut s = TestServer::start().await;
    for (id, status) in [("keeps-enabled", "enabled"), ("keeps-disabled", "disabled")] {
        let (code, _) = s
            .post_json(
                "/weir/v1/tasks",
                json!({
                    "id": id,
                    "type": "stream",
                    "dbrps": [{"db": "mydb", "rp": "myrp"}],
                    "script": "stream\n    |from()\n        .measurement('test')\n",
                    "status": status,
                }),
            )
            .await;
        assert_eq!(code, StatusCode::OK);
    }

    s.restart().await;

    let (_, task) = s.get_json("/weir/v1/tasks/keeps-enabled").await;
    assert_eq!(task["status"], "enabled");
    assert_eq!(task["executing"], true);
    let (_, task) = s.get_json("/weir/v1/tasks/keeps-disabled").await;
    assert_eq!(task["status"], "disabled");
    assert_eq!(task["executing"], false);
}
