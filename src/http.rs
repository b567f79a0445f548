use std::time::Duration;

use reqwest::Client;

/// HTTP client used by the backend and webhook clients.
pub(crate) fn client(timeout: Duration) -> reqwest::Result<Client> {
    let builder = Client::builder().timeout(timeout);
    // Local scripted servers must not go through an ambient proxy.
    #[cfg(test)]
    let builder = builder.no_proxy();
    builder.build()
}

#[cfg(test)]
pub(crate) mod scripted {
    //! One-shot HTTP/1.1 server answering each connection with the next
    //! canned response and recording what it received.

    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    pub(crate) struct Recorded {
        /// e.g. `POST /auth/v1/token?grant_type=password HTTP/1.1`
        pub request_line: String,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl Recorded {
        pub(crate) fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub(crate) fn json(&self) -> serde_json::Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    pub(crate) struct ScriptedServer {
        pub url: String,
        requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl ScriptedServer {
        pub(crate) async fn start(responses: Vec<(u16, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));

            let log = requests.clone();
            tokio::spawn(async move {
                for (status, body) in responses {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let mut reader = BufReader::new(stream);

                    let mut request_line = String::new();
                    reader.read_line(&mut request_line).await.unwrap();
                    let mut headers = Vec::new();
                    loop {
                        let mut line = String::new();
                        reader.read_line(&mut line).await.unwrap();
                        let line = line.trim_end();
                        if line.is_empty() {
                            break;
                        }
                        if let Some((k, v)) = line.split_once(':') {
                            headers.push((k.trim().to_string(), v.trim().to_string()));
                        }
                    }

                    let len = headers
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    let mut buf = vec![0; len];
                    reader.read_exact(&mut buf).await.unwrap();

                    log.lock().unwrap().push(Recorded {
                        request_line: request_line.trim_end().to_string(),
                        headers,
                        body: String::from_utf8_lossy(&buf).into_owned(),
                    });

                    let response = format!(
                        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let mut stream = reader.into_inner();
                    stream.write_all(response.as_bytes()).await.unwrap();
                    let _ = stream.shutdown().await;
                }
            });

            Self { url, requests }
        }

        pub(crate) fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }
    }
}
