//! Line-oriented reading from helper pipes
//!
//! The reader owns the bytes received so far but not yet returned as a
//! line, so it can be re-entered on every readiness notification of a
//! non-blocking pipe without losing partial records.

use std::io::{self, ErrorKind, Read};

/// Bytes requested from the source per read(2)
const READ_CHUNK: usize = 4096;

/// Outcome of a single [`LineReader::read_line`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, newline stripped
    Line(String),
    /// No complete line yet and the source has no data available right now
    WouldBlock,
    /// The peer closed the pipe and every buffered line has been returned
    EndOfStream,
}

/// Accumulates bytes from a pipe and yields complete lines
#[derive(Debug, Default)]
pub struct LineReader {
    buffer: Vec<u8>,
    eof: bool,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any buffered input, ready for a new stream
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.eof = false;
    }

    /// Number of bytes buffered but not yet returned
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Read the next line from `source`
    ///
    /// Works on blocking and non-blocking sources alike. An unterminated
    /// fragment left when the stream closes is returned as a final line.
    pub fn read_line<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<LineRead> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(LineRead::Line(line));
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(LineRead::EndOfStream);
                }
                let rest = std::mem::take(&mut self.buffer);
                return Ok(LineRead::Line(String::from_utf8_lossy(&rest).into_owned()));
            }

            let mut chunk = [0u8; READ_CHUNK];
            match source.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(LineRead::WouldBlock),
                Err(e) => return Err(e),
            }
        }
    }

    /// Split the first complete line off the buffer
    fn take_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Source that hands out scripted chunks, reporting WouldBlock between them
    struct Trickle {
        steps: VecDeque<Option<&'static [u8]>>,
    }

    impl Trickle {
        fn new(steps: &[Option<&'static [u8]>]) -> Self {
            Self {
                steps: steps.iter().copied().collect(),
            }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Some(data)) => {
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                Some(None) => Err(io::Error::from(ErrorKind::WouldBlock)),
                None => Ok(0),
            }
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "gone"))
        }
    }

    #[test]
    fn test_lines_from_single_read() {
        let mut source: &[u8] = b"one\ntwo\n";
        let mut reader = LineReader::new();

        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line("one".into()));
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line("two".into()));
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::EndOfStream);
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::EndOfStream);
    }

    #[test]
    fn test_partial_line_survives_would_block() {
        let mut source = Trickle::new(&[Some(b"12.5"), None, Some(b"0\n-\n"), None]);
        let mut reader = LineReader::new();

        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::WouldBlock);
        assert_eq!(reader.pending(), 4);
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line("12.50".into()));
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line("-".into()));
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::WouldBlock);
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::EndOfStream);
    }

    #[test]
    fn test_empty_lines_are_returned() {
        let mut source: &[u8] = b"\n\nx\n";
        let mut reader = LineReader::new();

        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line(String::new()));
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line(String::new()));
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line("x".into()));
    }

    #[test]
    fn test_unterminated_tail_is_final_line() {
        let mut source: &[u8] = b"a\tb\tc\n/d\te\tf";
        let mut reader = LineReader::new();

        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line("a\tb\tc".into()));
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::Line("/d\te\tf".into()));
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::EndOfStream);
    }

    #[test]
    fn test_read_error_is_propagated() {
        let mut reader = LineReader::new();
        let err = reader.read_line(&mut Broken).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_reset_discards_buffer() {
        let mut source = Trickle::new(&[Some(b"stale"), None]);
        let mut reader = LineReader::new();
        assert_eq!(reader.read_line(&mut source).unwrap(), LineRead::WouldBlock);

        reader.reset();
        assert_eq!(reader.pending(), 0);

        let mut fresh: &[u8] = b"fresh\n";
        assert_eq!(reader.read_line(&mut fresh).unwrap(), LineRead::Line("fresh".into()));
    }
}
