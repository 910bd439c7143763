use tokio::sync::mpsc;

/// Producing end of a pipeline queue.
pub struct QueueSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Returns false once the consuming end has been dropped.
    pub fn enqueue(&self, item: T) -> bool {
        self.tx.send(item).is_ok()
    }

    pub fn enqueue_all(&self, items: impl IntoIterator<Item = T>) -> bool {
        items.into_iter().all(|item| self.enqueue(item))
    }
}

/// Consuming end of a pipeline queue. Never waits: an empty queue yields nothing.
pub struct QueueReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> QueueReceiver<T> {
    pub fn dequeue(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Take at most `max` items, oldest first.
    pub fn drain_up_to(&mut self, max: usize) -> Vec<T> {
        let mut items = Vec::new();
        while items.len() < max {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
        items
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create an unbounded FIFO queue between two loops.
pub fn create_queue<T>() -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}
