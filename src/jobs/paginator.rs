/// Page cursor for one run. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    page: u32,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new()
    }
}

impl Paginator {
    pub fn new() -> Self {
        Self { page: 1 }
    }

    pub fn current(&self) -> u32 {
        self.page
    }

    pub fn is_first(&self) -> bool {
        self.page == 1
    }

    /// Move past the page just consumed. Returns false once the current page
    /// has reached `total_pages` as declared by that page; 0 and 1 both mean
    /// a single page.
    pub fn advance(&mut self, total_pages: u32) -> bool {
        if self.page >= total_pages {
            return false;
        }
        self.page += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetches_for(total: u32) -> u32 {
        let mut paginator = Paginator::new();
        let mut fetched = 1;
        while paginator.advance(total) {
            fetched += 1;
        }
        fetched
    }

    #[test]
    fn single_page_totals_stop_after_one() {
        assert_eq!(fetches_for(0), 1);
        assert_eq!(fetches_for(1), 1);
    }

    #[test]
    fn walks_exactly_total_pages() {
        for total in 2..=7 {
            assert_eq!(fetches_for(total), total);
        }
    }

    #[test]
    fn follows_each_pages_own_total() {
        let mut paginator = Paginator::new();
        assert!(paginator.is_first());
        assert!(paginator.advance(3));
        assert_eq!(paginator.current(), 2);
        assert!(!paginator.is_first());
        // The collection shrank between requests.
        assert!(!paginator.advance(2));
        assert_eq!(paginator.current(), 2);
    }
}
