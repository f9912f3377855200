use crate::error::IngestError;
use lopdf::Document;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;

    /// Page texts joined with a newline, in page order. Pages without
    /// extractable text contribute an empty string.
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String, IngestError> {
        let pages = self.extract_pages(pdf_bytes)?;
        Ok(join_pages(&pages))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(pdf_bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            // Image-only pages and pages with unsupported font encodings
            // still occupy a slot.
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    debug!(page = page_no, %error, "page has no extractable text");
                    String::new()
                }
            };

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.trim_end_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{join_pages, LopdfExtractor, PageText, PdfExtractor};
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Builds a PDF with one page per entry; `None` produces a page with no
    /// text operators at all.
    pub(crate) fn build_pdf(pages: &[Option<&str>]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for page in pages {
            let operations = match page {
                Some(text) => vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
                None => Vec::new(),
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().unwrap_or_default(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("pdf should serialize");
        bytes
    }

    #[test]
    fn extracts_page_text_in_order() {
        let pdf = build_pdf(&[Some("First page"), Some("Second page")]);
        let pages = LopdfExtractor.extract_pages(&pdf).expect("pdf should parse");

        assert_eq!(pages.len(), 2);
        assert!(pages[0].text.contains("First page"));
        assert!(pages[1].text.contains("Second page"));
    }

    #[test]
    fn textless_page_contributes_empty_string() {
        let pdf = build_pdf(&[Some("Hello"), None]);
        let pages = LopdfExtractor.extract_pages(&pdf).expect("pdf should parse");

        assert_eq!(pages.len(), 2);
        assert!(pages[1].text.trim().is_empty());
    }

    #[test]
    fn invalid_bytes_fail_with_parse_error() {
        let result = LopdfExtractor.extract_text(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(crate::IngestError::PdfParse(_))));
    }

    #[test]
    fn pages_are_joined_with_newlines() {
        let pages = vec![
            PageText {
                number: 1,
                text: "alpha\n".to_string(),
            },
            PageText {
                number: 2,
                text: String::new(),
            },
            PageText {
                number: 3,
                text: "gamma".to_string(),
            },
        ];

        assert_eq!(join_pages(&pages), "alpha\n\ngamma");
    }
}
