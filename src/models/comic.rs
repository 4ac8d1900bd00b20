use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicPanel {
    pub panel_number: u32,
    /// English scene description used as the image prompt.
    pub description: String,
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComicScript {
    pub topic: String,
    pub panels: Vec<ComicPanel>,
}

impl ComicScript {
    pub fn rendered_panels(&self) -> usize {
        self.panels.iter().filter(|p| p.image_url.is_some()).count()
    }

    /// Sets a panel image once. Returns false if the index is out of range
    /// or the panel already has an image.
    pub fn fill_panel(&mut self, index: usize, image_url: String) -> bool {
        match self.panels.get_mut(index) {
            Some(panel) if panel.image_url.is_none() => {
                panel.image_url = Some(image_url);
                true
            }
            _ => false,
        }
    }
}
