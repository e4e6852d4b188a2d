use proptest::prelude::*;
use rust_decimal::Decimal;

use crate::billing::{check_payment, compute_totals, BillingError, LineItemInput, PaymentOutcome};
use tally_shared::InvoiceStatus;

fn cents(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

fn line_item() -> impl Strategy<Value = LineItemInput> {
    (1i64..=1_000, 0i64..=1_000_000).prop_map(|(quantity_hundredths, price_cents)| LineItemInput {
        description: "Line".to_string(),
        quantity: cents(quantity_hundredths),
        unit_price: cents(price_cents),
    })
}

proptest! {
    #[test]
    fn total_is_subtotal_plus_tax_minus_discount(
        items in prop::collection::vec(line_item(), 1..10),
        tax in 0i64..100_000,
        discount in 0i64..100_000,
    ) {
        let tax = cents(tax);
        let discount = cents(discount);
        let subtotal: Decimal = items.iter().map(LineItemInput::amount).sum();

        match compute_totals(&items, tax, discount) {
            Ok(totals) => {
                prop_assert_eq!(totals.subtotal, subtotal);
                prop_assert_eq!(totals.total, totals.subtotal + totals.tax - totals.discount);
                prop_assert!(totals.total >= Decimal::ZERO);
            }
            Err(e) => {
                prop_assert_eq!(e, BillingError::NegativeTotal);
                prop_assert!(subtotal + tax < discount);
            }
        }
    }

    #[test]
    fn accepted_payments_never_exceed_total(
        total in 1i64..1_000_000,
        attempts in prop::collection::vec(-1_000i64..500_000, 1..20),
    ) {
        let total = cents(total);
        let mut paid = Decimal::ZERO;
        let mut settled = false;

        for attempt in attempts {
            let amount = cents(attempt);
            match check_payment(total, paid, amount) {
                Ok(outcome) => {
                    prop_assert!(!settled, "payment accepted after settlement");
                    paid += amount;
                    match outcome {
                        PaymentOutcome::Settled => {
                            prop_assert_eq!(paid, total);
                            settled = true;
                        }
                        PaymentOutcome::Partial { balance_due } => {
                            prop_assert_eq!(balance_due, total - paid);
                            prop_assert!(balance_due > Decimal::ZERO);
                        }
                    }
                }
                Err(_) => prop_assert!(amount <= Decimal::ZERO || paid + amount > total),
            }
            prop_assert!(paid <= total);
        }
    }
}

#[test]
fn status_graph_has_no_cycles() {
    fn visit(status: InvoiceStatus, path: &mut Vec<InvoiceStatus>) {
        for next in InvoiceStatus::ALL {
            if next == status || !status.can_transition_to(next) {
                continue;
            }
            assert!(!path.contains(&next), "cycle through {:?} -> {}", path, next);
            path.push(next);
            visit(next, path);
            path.pop();
        }
    }

    for start in InvoiceStatus::ALL {
        visit(start, &mut vec![start]);
    }
}

#[test]
fn every_open_invoice_can_still_be_settled_or_cancelled() {
    for status in InvoiceStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
        assert!(status.can_transition_to(InvoiceStatus::Paid));
        assert!(status.can_transition_to(InvoiceStatus::Cancelled));
    }
}
