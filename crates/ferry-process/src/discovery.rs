use std::sync::OnceLock;

/// Bytes of stderr retained while looking for the endpoint.
const SCAN_WINDOW_BYTES: usize = 8 * 1024;

/// Longest stderr line forwarded as a single output event.
const MAX_LINE_BYTES: usize = 16 * 1024;

fn endpoint_regex() -> &'static regex::Regex {
    static ENDPOINT_RE: OnceLock<regex::Regex> = OnceLock::new();
    ENDPOINT_RE.get_or_init(|| {
        regex::Regex::new(r"(?i)ws://[\d.]+:\d+/[a-z0-9]+")
            .expect("endpoint regex should compile")
    })
}

/// Finds the inspector WebSocket URL in a runtime's stderr.
///
/// Input arrives in arbitrary chunks, so the scanner keeps a sliding window of
/// the most recent output. The window is bounded; a runtime that never prints
/// an endpoint cannot make it grow.
#[derive(Debug, Default)]
pub struct EndpointScanner {
    window: String,
    found: Option<String>,
}

impl EndpointScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk. Returns the endpoint the first time a complete line
    /// containing it has been seen.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        if self.found.is_some() {
            return None;
        }
        self.window.push_str(chunk);

        // Only complete lines are scanned so a URL split mid-chunk is not
        // matched by its prefix.
        let complete = self.window.rfind('\n').map_or("", |end| &self.window[..end]);
        if let Some(m) = endpoint_regex().find(complete) {
            let url = m.as_str().to_owned();
            self.found = Some(url.clone());
            self.window.clear();
            return Some(url);
        }

        if self.window.len() > SCAN_WINDOW_BYTES {
            let mut cut = self.window.len() - SCAN_WINDOW_BYTES;
            while !self.window.is_char_boundary(cut) {
                cut += 1;
            }
            self.window.drain(..cut);
        }
        None
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.found.as_deref()
    }

    /// Recent output, for error reports when discovery fails.
    pub fn tail(&self) -> &str {
        &self.window
    }
}

/// Whether a stderr line belongs to the runtime's inspector banner.
pub fn is_banner_line(line: &str) -> bool {
    const MARKERS: [&str; 5] = [
        "Bun Inspector",
        "Listening:",
        "ws://",
        "debug.bun.sh",
        "Inspect in browser",
    ];
    let trimmed = line.trim();
    trimmed.is_empty()
        || trimmed.chars().all(|c| c == '-' || c == '=')
        || MARKERS.iter().any(|marker| line.contains(marker))
}

/// Splits a byte stream into lines without unbounded buffering.
///
/// Lines are decoded only once complete, so a character split across reads
/// survives intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete lines (without terminators) contained in `chunk` plus what
    /// was carried over. Overlong partial lines are emitted as-is.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        if self.partial.len() > MAX_LINE_BYTES {
            // An incomplete trailing character waits for the next chunk.
            let cut = match std::str::from_utf8(&self.partial) {
                Err(err) if err.error_len().is_none() => err.valid_up_to(),
                _ => self.partial.len(),
            };
            let line: Vec<u8> = self.partial.drain(..cut).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        (!rest.is_empty()).then(|| String::from_utf8_lossy(&rest).into_owned())
    }
}
