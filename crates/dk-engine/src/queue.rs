//! Ordered task queue drained one script at a time.

use dk_dom::NodeId;

/// One deferred unit of work. Tasks are explicit values rather than
/// closures so an external load can suspend the drain and be resumed by
/// the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Evaluate inline script text, with the sentinel node it came from.
    Inline { node: NodeId, source: String },
    /// Load and evaluate an external script.
    External { node: NodeId, url: String },
}

/// Append-only task list with a read cursor. The list never shrinks
/// during a run; `next` only advances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQueue {
    tasks: Vec<Task>,
    next: usize,
}

impl TaskQueue {
    /// Inserts `task` at `position`, defaulting to the end. Positions
    /// past the end clamp to an append; positions before the cursor
    /// clamp to the cursor so already-run slots are never disturbed.
    pub fn submit(&mut self, task: Task, position: Option<usize>) {
        let position = position
            .unwrap_or(self.tasks.len())
            .clamp(self.next, self.tasks.len());
        self.tasks.insert(position, task);
    }

    /// Takes the next unread task, advancing the cursor first so a
    /// nested submit at the cursor lands after this task.
    pub fn take_next(&mut self) -> Option<Task> {
        if self.next >= self.tasks.len() {
            return None;
        }
        self.next += 1;
        self.tasks.get(self.next - 1).cloned()
    }

    pub fn has_next(&self) -> bool {
        self.next < self.tasks.len()
    }

    /// Current cursor; splice point for scripts discovered mid-run.
    pub fn cursor(&self) -> usize {
        self.next
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// True when every submitted task has been read.
    pub fn drained(&self) -> bool {
        self.next == self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::Task;
    use super::TaskQueue;

    fn inline(source: &str) -> Task {
        Task::Inline {
            node: 0,
            source: source.to_owned(),
        }
    }

    fn source_of(task: Option<Task>) -> String {
        match task {
            Some(Task::Inline { source, .. }) => source,
            Some(Task::External { url, .. }) => url,
            None => String::new(),
        }
    }

    #[test]
    fn drains_in_submission_order() {
        let mut queue = TaskQueue::default();
        queue.submit(inline("a"), None);
        queue.submit(inline("b"), None);
        assert_eq!(source_of(queue.take_next()), "a");
        assert_eq!(source_of(queue.take_next()), "b");
        assert!(queue.drained());
        assert!(queue.take_next().is_none());
    }

    #[test]
    fn submit_at_cursor_runs_next() {
        let mut queue = TaskQueue::default();
        queue.submit(inline("a"), None);
        queue.submit(inline("b"), None);
        assert_eq!(source_of(queue.take_next()), "a");
        // Discovered by a's document.write: spliced ahead of b.
        queue.submit(inline("a1"), Some(queue.cursor()));
        assert_eq!(source_of(queue.take_next()), "a1");
        assert_eq!(source_of(queue.take_next()), "b");
    }

    #[test]
    fn positions_clamp_to_valid_range() {
        let mut queue = TaskQueue::default();
        queue.submit(inline("a"), Some(99));
        assert_eq!(source_of(queue.take_next()), "a");
        // Position behind the cursor clamps forward.
        queue.submit(inline("b"), Some(0));
        assert_eq!(source_of(queue.take_next()), "b");
        assert!(queue.cursor() <= queue.len());
    }
}
