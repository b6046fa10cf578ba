use syncline_db::checkpoint::models::Cursor;

use super::{ErpClient, ErpError, InvoicePage};

/// Lazy walk over the ERP invoice stream from a starting cursor.
///
/// Pages are fetched on demand. A failed fetch leaves the feed where it was,
/// so calling `next_page` again retries the same page.
pub struct InvoiceFeed<'a> {
    client: &'a dyn ErpClient,
    cursor: Cursor,
    finished: bool,
}

impl<'a> InvoiceFeed<'a> {
    pub fn new(client: &'a dyn ErpClient, from: Cursor) -> Self {
        Self {
            client,
            cursor: from,
            finished: false,
        }
    }

    /// Cursor the next fetch will start from.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// `Ok(None)` once the ERP has signalled end of stream.
    pub async fn next_page(&mut self) -> Result<Option<InvoicePage>, ErpError> {
        if self.finished {
            return Ok(None);
        }

        let page = self.client.fetch_invoices_since(self.cursor).await?;
        if page.next_cursor < self.cursor {
            return Err(ErpError::Malformed(format!(
                "next cursor {} is behind {}",
                page.next_cursor, self.cursor
            )));
        }
        if !page.end_of_stream && page.next_cursor == self.cursor && page.records.is_empty() {
            return Err(ErpError::Malformed(format!(
                "empty page at {} without end of stream",
                self.cursor
            )));
        }

        self.cursor = page.next_cursor;
        self.finished = page.end_of_stream;
        Ok(Some(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erp::mock::InMemoryErp;
    use crate::erp::mock::tests::sample_invoice;

    #[tokio::test]
    async fn walks_pages_until_end_of_stream() {
        let erp = InMemoryErp::new().with_page_size(2);
        for seq in 1..=5 {
            erp.add_invoice(sample_invoice(&format!("INV-{seq}"), "42", 100, seq));
        }

        let mut feed = InvoiceFeed::new(&erp, Cursor::EPOCH);
        let mut sizes = Vec::new();
        while let Some(page) = feed.next_page().await.unwrap() {
            sizes.push(page.records.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(feed.cursor().value(), 5);
        assert!(feed.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restarts_from_any_cursor() {
        let erp = InMemoryErp::new().with_page_size(10);
        for seq in 1..=4 {
            erp.add_invoice(sample_invoice(&format!("INV-{seq}"), "42", 100, seq));
        }

        let mut feed = InvoiceFeed::new(&erp, Cursor::new(2).unwrap());
        let page = feed.next_page().await.unwrap().unwrap();
        let ids: Vec<_> = page
            .records
            .iter()
            .map(|r| r.as_ref().unwrap().external_id.clone())
            .collect();
        assert_eq!(ids, vec!["INV-3", "INV-4"]);
        assert!(page.end_of_stream);
    }

    #[tokio::test]
    async fn failed_fetch_does_not_move_cursor() {
        let erp = InMemoryErp::new().with_page_size(10);
        erp.add_invoice(sample_invoice("INV-1", "42", 100, 1));
        erp.fail_fetch_on_call(0, ErpError::Transient("503".into()));

        let mut feed = InvoiceFeed::new(&erp, Cursor::EPOCH);
        assert!(feed.next_page().await.is_err());
        assert_eq!(feed.cursor(), Cursor::EPOCH);
        assert!(feed.next_page().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_stream_ends_immediately() {
        let erp = InMemoryErp::new();
        let mut feed = InvoiceFeed::new(&erp, Cursor::EPOCH);
        let page = feed.next_page().await.unwrap().unwrap();
        assert!(page.records.is_empty());
        assert!(page.end_of_stream);
        assert!(feed.next_page().await.unwrap().is_none());
    }
}
