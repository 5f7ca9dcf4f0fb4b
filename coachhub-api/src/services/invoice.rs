//! Invoice documents.
//!
//! Invoices are rendered as self-contained HTML so they can be downloaded,
//! printed to PDF by the browser, or attached to an email unchanged.

use coachhub_shared::models::organization::Organization;
use coachhub_shared::models::payment::Payment;
use coachhub_shared::models::user::User;
use rust_decimal::Decimal;
use std::fmt::Write;

/// Download name for an invoice
pub fn invoice_filename(invoice_number: &str) -> String {
    format!("invoice-{}.html", invoice_number)
}

/// Escapes text for use in HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn money(amount: Decimal, currency: &str) -> String {
    format!("{:.2} {}", amount, escape_html(currency))
}

/// Renders `payment` as an HTML invoice issued by `organization` to `coach`.
pub fn render_invoice(payment: &Payment, organization: &Organization, coach: &User) -> String {
    let mut rows = String::new();
    for item in payment.line_items.iter() {
        // Writing to a String cannot fail
        let _ = write!(
            rows,
            "<tr><td>{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td></tr>",
            escape_html(&item.description),
            item.duration,
            money(item.rate, &payment.currency),
            money(item.amount, &payment.currency),
        );
    }

    let period = match (payment.period_start, payment.period_end) {
        (Some(start), Some(end)) => format!(
            "<p>Period: {} to {}</p>",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        ),
        _ => String::new(),
    };

    let notes = payment
        .notes
        .as_deref()
        .map(|n| format!("<p class=\"notes\">{}</p>", escape_html(n)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Invoice {number}</title>
    <style>
        body {{ font-family: Arial, sans-serif; color: #222; max-width: 800px; margin: 0 auto; padding: 24px; }}
        table {{ width: 100%; border-collapse: collapse; margin-top: 16px; }}
        th, td {{ border-bottom: 1px solid #ddd; padding: 8px; text-align: left; }}
        .num {{ text-align: right; }}
        .totals td {{ border: none; }}
        .notes {{ color: #555; }}
    </style>
</head>
<body>
    <h1>Invoice {number}</h1>
    <p><strong>{organization}</strong></p>
    <p>Billed to: {coach_name} ({coach_email})</p>
    <p>Issued: {issued} &middot; Due: {due} &middot; Status: {status}</p>
    {period}
    <table>
        <thead>
            <tr><th>Session</th><th class="num">Minutes</th><th class="num">Rate / hour</th><th class="num">Amount</th></tr>
        </thead>
        <tbody>
            {rows}
        </tbody>
    </table>
    <table class="totals">
        <tr><td class="num">Subtotal</td><td class="num">{subtotal}</td></tr>
        <tr><td class="num">Tax</td><td class="num">{tax}</td></tr>
        <tr><td class="num"><strong>Total</strong></td><td class="num"><strong>{total}</strong></td></tr>
    </table>
    {notes}
</body>
</html>"#,
        number = escape_html(&payment.invoice_number),
        organization = escape_html(&organization.name),
        coach_name = escape_html(&coach.full_name()),
        coach_email = escape_html(&coach.email),
        issued = payment.created_at.format("%Y-%m-%d"),
        due = payment.due_date.format("%Y-%m-%d"),
        status = payment.status.as_str(),
        period = period,
        rows = rows,
        subtotal = money(payment.amount, &payment.currency),
        tax = money(payment.tax_amount, &payment.currency),
        total = money(payment.total_amount, &payment.currency),
        notes = notes,
    )
}
