use printpdf::{
    BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
    Point,
};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tally_shared::{Customer, Invoice, InvoiceItem, Tenant};

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("PDF rendering failed: {0}")]
    Render(String),
    #[error("failed to store PDF: {0}")]
    Io(#[from] std::io::Error),
}

pub struct InvoiceDocument<'a> {
    pub tenant: &'a Tenant,
    pub customer: &'a Customer,
    pub invoice: &'a Invoice,
    pub items: &'a [InvoiceItem],
}

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const LEFT: f32 = 15.0;
const RIGHT: f32 = 195.0;
const BOTTOM_MARGIN: f32 = 30.0;

const X_QTY: f32 = 115.0;
const X_UNIT: f32 = 140.0;
const X_AMOUNT: f32 = 170.0;

/// Writes top-down and starts a new page when the cursor reaches the bottom margin.
struct Cursor {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
}

impl Cursor {
    fn text(&self, text: &str, size: f32, x: f32, bold: bool) {
        let font = if bold { &self.bold } else { &self.font };
        self.layer.use_text(text, size, Mm(x), Mm(self.y), font);
    }

    fn rule(&self) {
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(LEFT), Mm(self.y)), false),
                (Point::new(Mm(RIGHT), Mm(self.y)), false),
            ],
            is_closed: false,
        });
    }

    fn down(&mut self, mm: f32) {
        self.y -= mm;
        if self.y < BOTTOM_MARGIN {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT - 20.0;
        }
    }
}

pub fn render_invoice(data: &InvoiceDocument<'_>) -> Result<Vec<u8>, PdfError> {
    let invoice = data.invoice;
    let currency = data.tenant.currency;

    let title = format!("Invoice {}", invoice.invoice_number);
    let (doc, page1, layer1) = PdfDocument::new(&title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let layer = doc.get_page(page1).get_layer(layer1);
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| PdfError::Render(e.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| PdfError::Render(e.to_string()))?;

    let mut c = Cursor {
        doc,
        layer,
        font,
        bold,
        y: 280.0,
    };

    // Header
    c.text("INVOICE", 24.0, LEFT, true);
    c.text(&format!("#{}", invoice.invoice_number), 11.0, 140.0, true);
    c.down(6.0);
    c.text(&format!("Date: {}", invoice.issue_date.format("%Y-%m-%d")), 10.0, 140.0, false);
    c.down(5.0);
    c.text(&format!("Due Date: {}", invoice.due_date.format("%Y-%m-%d")), 10.0, 140.0, false);

    // Issuer
    c.down(10.0);
    c.text(&data.tenant.name, 12.0, LEFT, true);
    c.down(5.0);
    c.text(&data.tenant.email, 10.0, LEFT, false);
    for line in [&data.tenant.phone, &data.tenant.address].into_iter().flatten() {
        c.down(5.0);
        c.text(line, 10.0, LEFT, false);
    }

    // Bill to
    c.down(12.0);
    c.text("Bill To:", 12.0, LEFT, true);
    c.down(6.0);
    c.text(&data.customer.name, 10.0, LEFT, false);
    c.down(5.0);
    c.text(&data.customer.email, 10.0, LEFT, false);
    if let Some(phone) = &data.customer.phone {
        c.down(5.0);
        c.text(phone, 10.0, LEFT, false);
    }
    let address = data.customer.address_line();
    if !address.is_empty() {
        c.down(5.0);
        c.text(&address, 10.0, LEFT, false);
    }
    if let Some(country) = &data.customer.country {
        c.down(5.0);
        c.text(country, 10.0, LEFT, false);
    }

    // Items
    c.down(12.0);
    c.text("Description", 10.0, LEFT, true);
    c.text("Qty", 10.0, X_QTY, true);
    c.text("Unit Price", 10.0, X_UNIT, true);
    c.text("Amount", 10.0, X_AMOUNT, true);
    c.down(3.0);
    c.rule();
    c.down(6.0);

    for item in data.items {
        c.text(&item.description, 10.0, LEFT, false);
        c.text(&item.quantity.normalize().to_string(), 10.0, X_QTY, false);
        c.text(&currency.format(item.unit_price), 10.0, X_UNIT, false);
        c.text(&currency.format(item.amount), 10.0, X_AMOUNT, false);
        c.down(6.0);
    }

    c.rule();
    c.down(8.0);

    // Totals
    c.text("Subtotal:", 10.0, X_UNIT, false);
    c.text(&currency.format(invoice.subtotal), 10.0, X_AMOUNT, false);
    c.down(6.0);
    c.text("Tax:", 10.0, X_UNIT, false);
    c.text(&currency.format(invoice.tax), 10.0, X_AMOUNT, false);
    c.down(6.0);
    c.text("Discount:", 10.0, X_UNIT, false);
    c.text(&format!("-{}", currency.format(invoice.discount)), 10.0, X_AMOUNT, false);
    c.down(7.0);
    c.text("Total:", 12.0, X_UNIT, true);
    c.text(&currency.format(invoice.total), 12.0, X_AMOUNT, true);

    if let Some(notes) = invoice.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        c.down(14.0);
        c.text("Notes:", 11.0, LEFT, true);
        for line in notes.lines() {
            c.down(5.0);
            c.text(line, 10.0, LEFT, false);
        }
    }

    c.down(16.0);
    c.text("Thank you for your business!", 10.0, LEFT, false);

    let mut writer = BufWriter::new(Vec::<u8>::new());
    c.doc
        .save(&mut writer)
        .map_err(|e| PdfError::Render(e.to_string()))?;
    writer
        .into_inner()
        .map_err(|e| PdfError::Render(e.to_string()))
}

pub fn pdf_file_name(invoice_number: &str) -> String {
    let safe: String = invoice_number
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' })
        .collect();
    format!("invoice-{}.pdf", safe)
}

/// Write the rendered PDF under `dir`, returning the stored path.
pub async fn store_pdf(dir: &Path, invoice_number: &str, bytes: &[u8]) -> Result<PathBuf, PdfError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(pdf_file_name(invoice_number));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
