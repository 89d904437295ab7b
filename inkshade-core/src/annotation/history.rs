//! Linear undo/redo stack of reversible annotation commands.

use std::collections::VecDeque;

use super::model::{Annotation, AnnotationId};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create(Annotation),
    Delete { annotation: Annotation, index: usize },
    Modify { before: Annotation, after: Annotation },
}

impl Command {
    pub fn id(&self) -> AnnotationId {
        match self {
            Command::Create(annotation) => annotation.id,
            Command::Delete { annotation, .. } => annotation.id,
            Command::Modify { after, .. } => after.id,
        }
    }

    pub fn apply(&self, items: &mut Vec<Annotation>) {
        match self {
            Command::Create(annotation) => items.push(annotation.clone()),
            Command::Delete { annotation, .. } => {
                items.retain(|item| item.id != annotation.id);
            }
            Command::Modify { after, .. } => replace(items, after),
        }
    }

    pub fn revert(&self, items: &mut Vec<Annotation>) {
        match self {
            Command::Create(annotation) => {
                items.retain(|item| item.id != annotation.id);
            }
            Command::Delete { annotation, index } => {
                let at = (*index).min(items.len());
                items.insert(at, annotation.clone());
            }
            Command::Modify { before, .. } => replace(items, before),
        }
    }
}

fn replace(items: &mut [Annotation], value: &Annotation) {
    if let Some(slot) = items.iter_mut().find(|item| item.id == value.id) {
        *slot = value.clone();
    }
}

/// Commands below `cursor` are applied; those above it can be redone.
#[derive(Debug, Clone)]
pub struct History {
    base: Vec<Annotation>,
    commands: VecDeque<Command>,
    cursor: usize,
    limit: usize,
    saved: Option<usize>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    pub fn new(base: Vec<Annotation>, limit: usize) -> Self {
        Self {
            base,
            commands: VecDeque::new(),
            cursor: 0,
            limit: limit.max(1),
            saved: Some(0),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.commands.len()
    }

    pub fn base(&self) -> &[Annotation] {
        &self.base
    }

    /// Records an already-applied command, dropping any redo tail.
    pub fn push(&mut self, command: Command) {
        self.commands.truncate(self.cursor);
        if self.saved.map_or(false, |saved| saved > self.cursor) {
            self.saved = None;
        }
        self.commands.push_back(command);
        self.cursor += 1;

        while self.commands.len() > self.limit {
            if let Some(oldest) = self.commands.pop_front() {
                oldest.apply(&mut self.base);
                self.cursor -= 1;
                self.saved = match self.saved {
                    Some(0) | None => None,
                    Some(saved) => Some(saved - 1),
                };
            }
        }
    }

    pub fn undo(&mut self, items: &mut Vec<Annotation>) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        self.commands[self.cursor].revert(items);
        true
    }

    pub fn redo(&mut self, items: &mut Vec<Annotation>) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.commands[self.cursor].apply(items);
        self.cursor += 1;
        true
    }

    pub fn mark_saved(&mut self) {
        self.saved = Some(self.cursor);
    }

    pub fn is_dirty(&self) -> bool {
        self.saved != Some(self.cursor)
    }

    /// Collection obtained by replaying the applied commands over the base.
    pub fn replay(&self) -> Vec<Annotation> {
        let mut items = self.base.clone();
        for command in self.commands.iter().take(self.cursor) {
            command.apply(&mut items);
        }
        items
    }
}
