use std::fmt;

/// One of the two HMD eyes.
///
/// Used as the index for eye buffers and for per-eye projection and view
/// queries against the runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Both eyes, in render order.
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    /// Array index for per-eye storage (`Left` = 0, `Right` = 1).
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_order_is_left_then_right() {
        assert_eq!(Eye::BOTH, [Eye::Left, Eye::Right]);
        assert_eq!(Eye::Left.index(), 0);
        assert_eq!(Eye::Right.index(), 1);
    }
}
