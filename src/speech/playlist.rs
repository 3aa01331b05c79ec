/// Ordered article ids and the one currently playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistCursor {
    ids: Vec<i64>,
    index: usize,
}

impl PlaylistCursor {
    /// Replaces the playlist. If `current_id` is not part of `ids` the
    /// playlist collapses to just that article.
    pub fn set_playlist(&mut self, ids: Vec<i64>, current_id: i64) {
        match ids.iter().position(|id| *id == current_id) {
            Some(index) => {
                self.ids = ids;
                self.index = index;
            }
            None => {
                tracing::warn!(
                    "Article {} not in playlist of {} entries, playing it alone",
                    current_id,
                    ids.len()
                );
                self.ids = vec![current_id];
                self.index = 0;
            }
        }
    }

    pub fn skip_next(&mut self) -> bool {
        if self.index + 1 < self.ids.len() {
            self.index += 1;
            true
        } else {
            false
        }
    }

    pub fn skip_previous(&mut self) -> bool {
        if self.index > 0 && !self.ids.is_empty() {
            self.index -= 1;
            true
        } else {
            false
        }
    }

    /// Re-points the cursor at `id`. Unknown ids leave it where it was.
    pub fn update_playing_id(&mut self, id: i64) -> bool {
        match self.ids.iter().position(|candidate| *candidate == id) {
            Some(index) => {
                self.index = index;
                true
            }
            None => false,
        }
    }

    pub fn current_id(&self) -> Option<i64> {
        self.ids.get(self.index).copied()
    }

    pub fn position(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_playlist_collapses_to_current() {
        let mut cursor = PlaylistCursor::default();
        cursor.set_playlist(Vec::new(), 42);

        assert_eq!(cursor.current_id(), Some(42));
        assert_eq!(cursor.len(), 1);
        assert!(!cursor.skip_next());
        assert!(!cursor.skip_previous());
        assert_eq!(cursor.current_id(), Some(42));
    }

    #[test]
    fn mismatched_playlist_collapses_to_current() {
        let mut cursor = PlaylistCursor::default();
        cursor.set_playlist(vec![1, 2, 3], 9);
        assert_eq!(cursor.current_id(), Some(9));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn skipping_is_bounded() {
        let mut cursor = PlaylistCursor::default();
        cursor.set_playlist(vec![1, 2, 3], 2);
        assert_eq!(cursor.position(), 1);

        assert!(cursor.skip_next());
        assert_eq!(cursor.current_id(), Some(3));
        assert!(!cursor.skip_next());
        assert_eq!(cursor.current_id(), Some(3));

        assert!(cursor.skip_previous());
        assert!(cursor.skip_previous());
        assert!(!cursor.skip_previous());
        assert_eq!(cursor.current_id(), Some(1));
    }

    #[test]
    fn unknown_playing_id_is_ignored() {
        let mut cursor = PlaylistCursor::default();
        cursor.set_playlist(vec![1, 2, 3], 1);

        assert!(cursor.update_playing_id(3));
        assert_eq!(cursor.position(), 2);
        assert!(!cursor.update_playing_id(77));
        assert_eq!(cursor.current_id(), Some(3));
    }
}
