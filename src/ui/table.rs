use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct RecordRow {
    #[tabled(rename = "Id")]
    pub id: String,
    #[tabled(rename = "Source")]
    pub source: String,
    #[tabled(rename = "Fields")]
    pub fields: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<RecordRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, id: &str, source: &str, fields: &str) {
        self.rows.push(RecordRow {
            id: id.to_string(),
            source: source.to_string(),
            fields: fields.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_renders_nothing() {
        assert!(TableBuilder::new().build().is_empty());
    }

    #[test]
    fn test_rows_render_with_headers() {
        let mut table = TableBuilder::new();
        table.add_row("a1", "inbox", r#"{"name":"x"}"#);
        let rendered = table.build();
        assert_eq!(table.len(), 1);
        assert!(rendered.contains("Id"));
        assert!(rendered.contains("Source"));
        assert!(rendered.contains("a1"));
    }
}
