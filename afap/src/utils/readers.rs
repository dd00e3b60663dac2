use std::io::{self, BufRead, BufReader, Lines, Read};

/// Iterates the meaningful lines of a newline separated file: comment lines
/// and blank lines are dropped and the remaining lines are trimmed.
pub struct NewlineReader<R: Read> {
    comment_marker: Option<char>,
    lines: Lines<BufReader<R>>,
}

impl<R: Read> NewlineReader<R> {
    pub fn new(wrapped: R) -> Self {
        let lines = BufReader::new(wrapped).lines();
        Self {
            lines,
            comment_marker: Some('#'),
        }
    }

    pub fn set_comment_marker(mut self, marker: Option<char>) -> Self {
        self.comment_marker = marker;
        self
    }

    fn skip_line(&self, line: &str) -> bool {
        line.is_empty() || self.comment_marker.map_or(false, |c| line.starts_with(c))
    }
}

impl<R: Read> Iterator for NewlineReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Err(e) => return Some(Err(e)),
                Ok(l) => {
                    let trimmed = l.trim();
                    if self.skip_line(trimmed) {
                        continue;
                    }
                    return Some(Ok(String::from(trimmed)));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::utils::NewlineReader;

    #[test]
    fn test_newline_reader() {
        let content = r#"#comment
com.example.agent

  com.example.signed:0a1b  
     # comment
not# comment"#;

        let mut bytes = content.as_bytes();
        let reader = NewlineReader::new(&mut bytes);
        let lines = reader
            .map(|it| it.expect("no errors"))
            .collect::<Vec<String>>();
        assert_eq!(
            lines.as_slice(),
            &["com.example.agent", "com.example.signed:0a1b", "not# comment"]
        )
    }

    #[test]
    fn test_newline_reader_no_comments() {
        let mut bytes = "#kept\n\nvalue".as_bytes();
        let reader = NewlineReader::new(&mut bytes).set_comment_marker(None);
        let lines = reader
            .map(|it| it.expect("no errors"))
            .collect::<Vec<String>>();
        assert_eq!(lines.as_slice(), &["#kept", "value"]);
    }
}
