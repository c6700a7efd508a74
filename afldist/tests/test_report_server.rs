use std::{fs, sync::mpsc, sync::Arc, thread, time::Duration};

use afldist::{coverage::ReportServer, events::RecordingSink};

#[test]
fn test_server_binds_only_once_report_exists() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let web_dir = tmp_dir.path().join("cov/web");
    fs::create_dir_all(&web_dir).unwrap();

    let server = ReportServer::new(
        web_dir.clone(),
        "127.0.0.1:0".to_owned(),
        Duration::from_millis(50),
        Arc::new(RecordingSink::new()),
    );
    assert_eq!(server.report_artifact(), web_dir.join("index.html"));

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        server.wait_for_report();
        let bound = server.bind().unwrap();
        tx.send(bound.local_addr().unwrap()).unwrap();
        bound.serve();
    });

    // Nothing is bound while the report is missing.
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());

    fs::write(web_dir.join("gcov.css"), "td { }").unwrap();
    fs::write(web_dir.join("index.html"), "<html>coverage</html>").unwrap();
    let addr = rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let response = ureq::get(&format!("http://{}/", addr)).call().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.header("Content-Type"),
        Some("text/html; charset=utf-8")
    );
    assert_eq!(response.into_string().unwrap(), "<html>coverage</html>");

    let css = ureq::get(&format!("http://{}/gcov.css", addr))
        .call()
        .unwrap();
    assert_eq!(css.header("Content-Type"), Some("text/css"));

    match ureq::get(&format!("http://{}/missing.html", addr)).call() {
        Err(ureq::Error::Status(code, _)) => assert_eq!(code, 404),
        other => panic!("Expected 404, got {:?}", other.map(|r| r.status())),
    }
}
