pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    (bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-'))
        || bytes.get(idx) == Some(&b'#')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

enum State {
    Normal,
    LineComment,
    BlockComment,
}

/// True when `sql` holds nothing but whitespace and comments.
pub(super) fn only_comments(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut state = State::Normal;
    let mut idx = 0;
    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => {
                if is_line_comment_start(bytes, idx) {
                    state = State::LineComment;
                } else if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment;
                    idx += 1;
                } else if !b.is_ascii_whitespace() {
                    return false;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if is_block_comment_end(bytes, idx) {
                    state = State::Normal;
                    idx += 1;
                }
            }
        }
        idx += 1;
    }
    true
}
