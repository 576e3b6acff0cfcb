//! Streaming SQL statement splitter.
//!
//! Schema files are read in fixed-size chunks and cut into statements on
//! `;` outside of quotes, comments and (PostgreSQL) dollar-quoted bodies.
//! Every statement carries the absolute byte offset just past its
//! terminator, which the apply step reports as progress.
//!
//! Client-side directives such as the MySQL `DELIMITER` command are not
//! understood; schemas containing stored routines must use dollar quoting
//! (PostgreSQL) or be split by the caller.

use std::collections::VecDeque;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ApplyError;

/// Read size for schema files.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Lexical rules that differ between engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `#` line comments, backslash escapes inside quotes.
    MySql,
    /// `$tag$ ... $tag$` dollar quoting.
    Postgres,
}

/// One complete statement, trimmed, without its terminating `;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    /// Absolute byte offset just past the statement's terminator.
    pub end_offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum State {
    #[default]
    Normal,
    Quoted {
        quote: u8,
        escaped: bool,
    },
    LineComment,
    BlockComment {
        star: bool,
    },
    DollarQuoted {
        tag: Vec<u8>,
    },
}

enum TagScan {
    Tag(usize),
    NotTag,
    Incomplete,
}

/// Incremental splitter. Feed chunks with [`push`](Self::push), then call
/// [`finish`](Self::finish) for a trailing statement without terminator.
#[derive(Debug)]
pub struct SqlSplitter {
    dialect: Dialect,
    buf: Vec<u8>,
    /// Absolute offset of `buf[0]`.
    base: u64,
    /// Next byte of `buf` to scan.
    pos: usize,
    state: State,
    /// Whether the pending statement has anything besides whitespace and comments.
    has_content: bool,
}

impl SqlSplitter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            buf: Vec::new(),
            base: 0,
            pos: 0,
            state: State::Normal,
            has_content: false,
        }
    }

    /// Append a chunk and return every statement it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Statement>, ApplyError> {
        self.buf.extend_from_slice(chunk);
        self.scan(false)
    }

    /// Flush the input. Returns the trailing unterminated statement, if any.
    pub fn finish(mut self) -> Result<Vec<Statement>, ApplyError> {
        let mut out = self.scan(true)?;
        if self.has_content {
            let end = self.buf.len();
            out.push(self.statement(0, end, end)?);
        }
        Ok(out)
    }

    fn scan(&mut self, eof: bool) -> Result<Vec<Statement>, ApplyError> {
        let mut out = Vec::new();
        let mut stmt_start = 0usize;
        let mut state = std::mem::take(&mut self.state);

        while self.pos < self.buf.len() {
            let b = self.buf[self.pos];
            let next = self.buf.get(self.pos + 1).copied();

            match &mut state {
                State::Normal => match b {
                    b';' => {
                        let end = self.pos + 1;
                        if self.has_content {
                            out.push(self.statement(stmt_start, self.pos, end)?);
                        }
                        stmt_start = end;
                        self.has_content = false;
                    }
                    b'\'' | b'"' | b'`' => {
                        state = State::Quoted {
                            quote: b,
                            escaped: false,
                        };
                        self.has_content = true;
                    }
                    b'-' => match next {
                        Some(b'-') => {
                            state = State::LineComment;
                            self.pos += 1;
                        }
                        None if !eof => break,
                        _ => self.has_content = true,
                    },
                    b'#' if self.dialect == Dialect::MySql => state = State::LineComment,
                    b'/' => match next {
                        Some(b'*') => {
                            state = State::BlockComment { star: false };
                            self.pos += 1;
                        }
                        None if !eof => break,
                        _ => self.has_content = true,
                    },
                    b'$' if self.dialect == Dialect::Postgres => {
                        match dollar_tag(&self.buf[self.pos..]) {
                            TagScan::Tag(len) => {
                                let tag = self.buf[self.pos..self.pos + len].to_vec();
                                state = State::DollarQuoted { tag };
                                self.pos += len - 1;
                                self.has_content = true;
                            }
                            TagScan::Incomplete if !eof => break,
                            _ => self.has_content = true,
                        }
                    }
                    c if c.is_ascii_whitespace() => {}
                    _ => self.has_content = true,
                },
                State::Quoted { quote, escaped } => {
                    if *escaped {
                        *escaped = false;
                    } else if b == b'\\' && self.dialect == Dialect::MySql {
                        *escaped = true;
                    } else if b == *quote {
                        // A doubled quote closes and immediately reopens.
                        state = State::Normal;
                    }
                }
                State::LineComment => {
                    if b == b'\n' {
                        state = State::Normal;
                    }
                }
                State::BlockComment { star } => {
                    if *star && b == b'/' {
                        state = State::Normal;
                    } else {
                        *star = b == b'*';
                    }
                }
                State::DollarQuoted { tag } => {
                    let rest = &self.buf[self.pos..];
                    if rest.starts_with(tag) {
                        self.pos += tag.len() - 1;
                        state = State::Normal;
                    } else if b == b'$' && !eof && rest.len() < tag.len() && tag.starts_with(rest) {
                        break;
                    }
                }
            }
            self.pos += 1;
        }

        self.state = state;
        self.buf.drain(..stmt_start);
        self.pos -= stmt_start;
        self.base += stmt_start as u64;
        Ok(out)
    }

    fn statement(&self, start: usize, end: usize, consumed: usize) -> Result<Statement, ApplyError> {
        let sql = std::str::from_utf8(&self.buf[start..end]).map_err(|e| ApplyError::InvalidUtf8 {
            offset: self.base + (start + e.valid_up_to()) as u64,
        })?;
        Ok(Statement {
            sql: sql.trim().to_string(),
            end_offset: self.base + consumed as u64,
        })
    }
}

/// Classify the bytes starting at a `$`.
fn dollar_tag(bytes: &[u8]) -> TagScan {
    for (i, &c) in bytes.iter().enumerate().skip(1) {
        if c == b'$' {
            return TagScan::Tag(i + 1);
        }
        let valid = if i == 1 {
            c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
        } else {
            c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
        };
        if !valid {
            return TagScan::NotTag;
        }
    }
    TagScan::Incomplete
}

/// Pulls statements out of an async byte source in bounded chunks.
pub struct StatementReader<R> {
    reader: R,
    splitter: Option<SqlSplitter>,
    ready: VecDeque<Statement>,
    chunk: Vec<u8>,
}

impl StatementReader<tokio::fs::File> {
    pub async fn open(path: &Path, dialect: Dialect) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(file, dialect))
    }
}

impl<R> StatementReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, dialect: Dialect) -> Self {
        Self {
            reader,
            splitter: Some(SqlSplitter::new(dialect)),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    /// Next statement, or `None` at end of input.
    pub async fn next_statement(&mut self) -> Result<Option<Statement>, ApplyError> {
        loop {
            if let Some(stmt) = self.ready.pop_front() {
                return Ok(Some(stmt));
            }
            let Some(splitter) = self.splitter.as_mut() else {
                return Ok(None);
            };

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if let Some(splitter) = self.splitter.take() {
                    self.ready.extend(splitter.finish()?);
                }
                continue;
            }
            self.ready.extend(splitter.push(&self.chunk[..n])?);
        }
    }
}
