#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusKind {
    Progress,
    Error,
}

/// What is drawn on top of a page's table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Layer {
    Table,
    Menu,
    Detail { title: String, body: String },
    /// Followed log output; the lines live with the stream's owner.
    Logs { title: String },
    Confirm { prompt: String },
    Status { message: String, kind: StatusKind },
}

impl Layer {
    pub fn is_overlay(&self) -> bool {
        !matches!(self, Self::Table)
    }

    // Menu, dialogs, status messages and followed logs do not survive
    // leaving the page.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Menu | Self::Confirm { .. } | Self::Status { .. } | Self::Logs { .. }
        )
    }
}

/// One history entry: the page identity plus the layer shown over it. The live
/// view is resolved through the page registry, never stored here.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PageTrack {
    pub name: String,
    pub layer: Layer,
}

impl PageTrack {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer: Layer::Table,
        }
    }
}

#[derive(Debug)]
pub struct DrawQueue {
    tracks: Vec<PageTrack>,
    root: PageTrack,
}

impl DrawQueue {
    pub fn new(root: &str) -> Self {
        Self {
            tracks: Vec::new(),
            root: PageTrack::table(root),
        }
    }

    pub fn enqueue(&mut self, track: PageTrack) {
        self.tracks.push(track);
    }

    pub fn dequeue(&mut self) -> Option<PageTrack> {
        self.tracks.pop()
    }

    pub fn last(&self) -> &PageTrack {
        self.tracks.last().unwrap_or(&self.root)
    }

    pub fn replace_last(&mut self, track: PageTrack) {
        match self.tracks.last_mut() {
            Some(last) => *last = track,
            None => self.tracks.push(track),
        }
    }

    pub fn settle_last(&mut self) {
        if let Some(last) = self.tracks.last_mut()
            && last.layer.is_transient()
        {
            last.layer = Layer::Table;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }
}
