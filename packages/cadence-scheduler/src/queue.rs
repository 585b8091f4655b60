use crate::task::{Priority, TaskId, TaskNode};
use slotmap::SlotMap;

/// The pending-task collection: a circular doubly-linked ring stored in a
/// slotmap arena, sorted ascending by expiration time starting from `head`.
/// The head is always the most urgent pending task.
#[derive(Default)]
pub struct TaskQueue {
    tasks: SlotMap<TaskId, TaskNode>,
    head: Option<TaskId>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: SlotMap::with_key(),
            head: None,
        }
    }

    /// Ordered insertion. Scans forward from the head and links the task
    /// before the first node with a strictly later expiration, so equal
    /// deadlines keep arrival order. Returns the new handle and whether the
    /// task became the new head (the caller must re-arm the host driver if
    /// so).
    pub fn insert(&mut self, node: TaskNode) -> (TaskId, bool) {
        self.link(node, false)
    }

    /// Like [`TaskQueue::insert`], but links before the first node with an
    /// equal-or-later expiration. Used for continuations: a yielded task
    /// resumes ahead of equal-deadline work it already preceded.
    pub fn insert_continuation(&mut self, node: TaskNode) -> (TaskId, bool) {
        self.link(node, true)
    }

    fn link(&mut self, node: TaskNode, ahead_of_equal: bool) -> (TaskId, bool) {
        let expiration = node.expiration;
        let id = self.tasks.insert(node);

        let Some(head) = self.head else {
            // Sole element: a self-linked ring.
            let task = &mut self.tasks[id];
            task.next = Some(id);
            task.prev = Some(id);
            self.head = Some(id);
            return (id, true);
        };

        // Find the first node the new task must precede.
        let mut anchor = None;
        let mut cursor = head;
        loop {
            let exp = self.tasks[cursor].expiration;
            let later = if ahead_of_equal {
                exp >= expiration
            } else {
                exp > expiration
            };
            if later {
                anchor = Some(cursor);
                break;
            }
            cursor = self.next_of(cursor);
            if cursor == head {
                break;
            }
        }

        let (anchor, becomes_head) = match anchor {
            // Later than everything: inserting before the head wraps around
            // to the tail position.
            None => (head, false),
            Some(a) if a == head => {
                self.head = Some(id);
                (a, true)
            }
            Some(a) => (a, false),
        };

        let prev = self.prev_of(anchor);
        self.tasks[prev].next = Some(id);
        self.tasks[anchor].prev = Some(id);
        let task = &mut self.tasks[id];
        task.next = Some(anchor);
        task.prev = Some(prev);
        (id, becomes_head)
    }

    /// O(1) unlink by handle. Returns `false` without touching the ring for
    /// stale or unknown handles; cancellation races are expected under
    /// reentrancy and are not errors.
    pub fn remove(&mut self, id: TaskId) -> bool {
        if !self.tasks.contains_key(id) {
            return false;
        }
        self.unlink(id);
        self.tasks.remove(id);
        true
    }

    /// Unlinks and returns the head task by value.
    pub fn pop_head(&mut self) -> Option<TaskNode> {
        let head = self.head?;
        self.unlink(head);
        let mut node = self
            .tasks
            .remove(head)
            .expect("ring head missing from the arena");
        node.next = None;
        node.prev = None;
        Some(node)
    }

    fn unlink(&mut self, id: TaskId) {
        let next = self.next_of(id);
        if next == id {
            self.head = None;
        } else {
            let prev = self.prev_of(id);
            self.tasks[prev].next = Some(next);
            self.tasks[next].prev = Some(prev);
            if self.head == Some(id) {
                self.head = Some(next);
            }
        }
    }

    pub fn first(&self) -> Option<TaskId> {
        self.head
    }

    pub fn head_expiration(&self) -> Option<f64> {
        self.head.map(|id| self.tasks[id].expiration)
    }

    pub fn head_priority(&self) -> Option<Priority> {
        self.head.map(|id| self.tasks[id].priority)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    fn next_of(&self, id: TaskId) -> TaskId {
        self.tasks[id].next.expect("queued task missing next link")
    }

    fn prev_of(&self, id: TaskId) -> TaskId {
        self.tasks[id].prev.expect("queued task missing prev link")
    }

    /// Walks the whole ring and panics on any broken link, stray arena
    /// entry, or ordering violation. Test support.
    pub fn verify_ring_integrity(&self) {
        let Some(head) = self.head else {
            assert!(self.tasks.is_empty(), "headless queue still holds tasks");
            return;
        };
        let mut count = 0;
        let mut cursor = head;
        loop {
            let node = self
                .tasks
                .get(cursor)
                .expect("ring links to a task missing from the arena");
            let next = node.next.expect("queued task missing next link");
            let back = self.tasks[next].prev.expect("queued task missing prev link");
            assert_eq!(back, cursor, "ring links are not mutual");
            if next != head {
                assert!(
                    node.expiration <= self.tasks[next].expiration,
                    "ring is not sorted by expiration"
                );
            }
            count += 1;
            assert!(count <= self.tasks.len(), "ring does not close");
            cursor = next;
            if cursor == head {
                break;
            }
        }
        assert_eq!(count, self.tasks.len(), "arena holds tasks outside the ring");
    }
}
