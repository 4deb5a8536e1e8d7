use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

use photo_autosync::{
    HttpUploader, Notification, Notifier, PreferenceStore, RunOutcome, RunSummary, SyncEngine,
    SyncEvent,
};

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Serve `requests` uploads; reject any whose body mentions "reject".
fn spawn_server(requests: usize) -> (String, thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/api/upload", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for _ in 0..requests {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 8192];

            let header_end = loop {
                let n = stream.read(&mut chunk).unwrap();
                assert!(n > 0);
                request.extend_from_slice(&chunk[..n]);
                if let Some(pos) = find(&request, b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap();
            while request.len() < header_end + length {
                let n = stream.read(&mut chunk).unwrap();
                assert!(n > 0);
                request.extend_from_slice(&chunk[..n]);
            }

            let body = String::from_utf8_lossy(&request[header_end..]).to_string();
            let reply = if body.contains("reject") {
                r#"{"code":403,"msg":"denied"}"#
            } else {
                r#"{"code":200,"msg":"ok"}"#
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                reply.len(),
                reply
            );
            stream.write_all(response.as_bytes()).unwrap();
            seen.push(body);
        }
        seen
    });

    (url, handle)
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Notification>>);

impl Notifier for Recorder {
    fn notify(&self, _id: u32, notification: &Notification) {
        self.0.lock().unwrap().push(*notification);
    }
}

#[test]
fn uploads_over_http_and_reconciles_directory() {
    let photos = tempfile::tempdir().unwrap();
    fs::write(photos.path().join("001.jpg"), b"first image").unwrap();
    fs::write(photos.path().join("002_reject.png"), b"second image").unwrap();
    fs::write(photos.path().join("003.JPEG"), b"third image").unwrap();
    fs::write(photos.path().join("clip.mp4"), b"video").unwrap();

    let (url, server) = spawn_server(3);

    let prefs = tempfile::tempdir().unwrap();
    let store = Arc::new(PreferenceStore::open(&prefs.path().join("prefs.db")).unwrap());
    store.save_parameters(&url, "integration-token", "").unwrap();
    store.set_directory(&photos.path().to_string_lossy()).unwrap();

    let recorder = Arc::new(Recorder::default());
    let engine = SyncEngine::new(
        store.clone(),
        Box::new(HttpUploader::new(None).unwrap()),
        recorder.clone(),
    );
    let events = engine.events().subscribe();

    let outcome = engine.run_once().unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Finished(RunSummary { total: 3, uploaded: 2, failed: 1 })
    );

    let bodies = server.join().unwrap();
    assert!(bodies[0].contains("filename=\"001.jpg\""));
    assert!(bodies[0].contains("first image"));
    assert!(bodies[0].contains("name=\"token\"\r\n\r\nintegration-token\r\n"));
    assert!(bodies[2].contains("filename=\"003.JPEG\""));

    assert!(!photos.path().join("001.jpg").exists());
    assert!(photos.path().join("002_reject.png").exists());
    assert!(!photos.path().join("003.JPEG").exists());
    assert!(photos.path().join("clip.mp4").exists());

    assert_eq!(store.total_upload_number().unwrap(), 2);
    assert_eq!(recorder.0.lock().unwrap().last(), Some(&Notification::Error));

    let received: Vec<SyncEvent> = events.try_iter().collect();
    assert_eq!(received.len(), 4);
    assert_eq!(received[3], SyncEvent::UploadCountUpdated("Total uploaded: 2".to_string()));
    assert!(!engine.is_running());

    // Second pass only sees the rejected file, which is still rejected
    let (url, server) = spawn_server(1);
    store.save_parameters(&url, "integration-token", "").unwrap();
    let outcome = engine.run_once().unwrap();
    server.join().unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Finished(RunSummary { total: 1, uploaded: 0, failed: 1 })
    );
    assert_eq!(store.total_upload_number().unwrap(), 2);
}
