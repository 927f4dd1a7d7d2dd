use std::sync::Arc;

use dog_media::MediaAdapter;

pub struct MediaState {
    pub media: Arc<MediaAdapter>,
}

impl Clone for MediaState {
    fn clone(&self) -> Self {
        Self {
            media: Arc::clone(&self.media),
        }
    }
}

impl MediaState {
    pub fn new(media: MediaAdapter) -> Self {
        Self {
            media: Arc::new(media),
        }
    }

    pub fn from_arc(media: Arc<MediaAdapter>) -> Self {
        Self { media }
    }
}
