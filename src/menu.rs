//! interactive operator menu over stdin/stdout

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};

use crate::decimal::{Money, Rate};
use crate::engine::BillingEngine;
use crate::repository::LoanRepository;
use crate::types::LoanId;

const SEPARATOR: &str = "***************************************************************";

enum Step {
    Continue,
    Exit,
}

/// run the menu until the operator exits or input ends
///
/// Operation failures and unparseable input are reported on `output` and the
/// menu carries on. Only failures of `input` or `output` themselves are returned.
pub fn run_menu<R, I, W>(engine: &BillingEngine<R>, mut input: I, mut output: W) -> Result<()>
where
    R: LoanRepository,
    I: BufRead,
    W: Write,
{
    loop {
        writeln!(output, "\n{}", SEPARATOR)?;
        writeln!(output, "Select an option:")?;
        writeln!(output, "1. Create New Loan")?;
        writeln!(output, "2. Get Outstanding Amount")?;
        writeln!(output, "3. Generate Payment Schedule")?;
        writeln!(output, "4. Make Payment")?;
        writeln!(output, "5. Check if borrower is delinquent")?;
        writeln!(output, "6. Show Loan Record")?;
        writeln!(output, "7. List Loans")?;
        writeln!(output, "8. Exit")?;

        let Some(choice) = prompt(&mut input, &mut output, "Enter choice: ")? else {
            writeln!(output)?;
            return Ok(());
        };

        let step = match choice.as_str() {
            "1" => create_loan(engine, &mut input, &mut output)?,
            "2" => outstanding(engine, &mut input, &mut output)?,
            "3" => schedule(engine, &mut input, &mut output)?,
            "4" => make_payment(engine, &mut input, &mut output)?,
            "5" => delinquency(engine, &mut input, &mut output)?,
            "6" => show_loan(engine, &mut input, &mut output)?,
            "7" => list_loans(engine, &mut output)?,
            "8" => {
                writeln!(output, "Exiting...")?;
                Step::Exit
            }
            _ => {
                writeln!(output, "Invalid choice, try again.")?;
                Step::Continue
            }
        };

        if let Step::Exit = step {
            return Ok(());
        }
    }
}

/// print `message` and read one trimmed line, `None` at end of input
fn prompt<I: BufRead, W: Write>(input: &mut I, output: &mut W, message: &str) -> Result<Option<String>> {
    write!(output, "{}", message)?;
    output.flush()?;

    let mut line = String::new();
    let read = input.read_line(&mut line).context("failed to read menu input")?;
    if read == 0 {
        return Ok(None);
    }

    Ok(Some(line.trim().to_string()))
}

fn prompt_week<I: BufRead, W: Write>(input: &mut I, output: &mut W) -> Result<Option<Option<u32>>> {
    let Some(text) = prompt(input, output, "Enter current week: ")? else {
        return Ok(None);
    };

    match text.parse::<u32>() {
        Ok(week) => Ok(Some(Some(week))),
        Err(_) => {
            writeln!(output, "Invalid week '{}'", text)?;
            Ok(Some(None))
        }
    }
}

fn pretty_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(headers.iter().map(|h| Cell::new(*h)));
    for r in rows {
        t.add_row(r.into_iter().map(Cell::new));
    }
    t
}

fn create_loan<R, I, W>(engine: &BillingEngine<R>, input: &mut I, output: &mut W) -> Result<Step>
where
    R: LoanRepository,
    I: BufRead,
    W: Write,
{
    let Some(principal) = prompt(input, output, "Enter principal amount: ")? else {
        return Ok(Step::Exit);
    };
    let Ok(principal) = principal.parse::<Money>() else {
        writeln!(output, "Invalid principal amount '{}'", principal)?;
        return Ok(Step::Continue);
    };

    let Some(rate) = prompt(input, output, "Enter interest rate: ")? else {
        return Ok(Step::Exit);
    };
    let Ok(rate) = Rate::parse_percent(&rate) else {
        writeln!(output, "Invalid interest rate '{}'", rate)?;
        return Ok(Step::Continue);
    };

    let Some(weeks) = prompt(input, output, "Enter number of weeks: ")? else {
        return Ok(Step::Exit);
    };
    let Ok(weeks) = weeks.parse::<u32>() else {
        writeln!(output, "Invalid number of weeks '{}'", weeks)?;
        return Ok(Step::Continue);
    };

    match engine.create_loan(principal, rate, weeks) {
        Ok(id) => writeln!(output, "New Loan ID: {}", id)?,
        Err(e) => writeln!(output, "Error creating loan: {}", e)?,
    }
    Ok(Step::Continue)
}

fn outstanding<R, I, W>(engine: &BillingEngine<R>, input: &mut I, output: &mut W) -> Result<Step>
where
    R: LoanRepository,
    I: BufRead,
    W: Write,
{
    let Some(id) = prompt(input, output, "Enter Loan ID: ")? else {
        return Ok(Step::Exit);
    };

    match engine.get_outstanding(&LoanId::new(id)) {
        Ok(amount) => writeln!(output, "Outstanding amount: {:.2}", amount)?,
        Err(e) => writeln!(output, "Error: {}", e)?,
    }
    Ok(Step::Continue)
}

fn schedule<R, I, W>(engine: &BillingEngine<R>, input: &mut I, output: &mut W) -> Result<Step>
where
    R: LoanRepository,
    I: BufRead,
    W: Write,
{
    let Some(id) = prompt(input, output, "Enter Loan ID: ")? else {
        return Ok(Step::Exit);
    };

    match engine.get_schedule(&LoanId::new(id)) {
        Ok(schedule) => {
            let rows = schedule
                .iter()
                .map(|e| vec![e.week.to_string(), e.status.to_string()])
                .collect();
            writeln!(output, "{}", pretty_table(&["Week", "Status"], rows))?;
        }
        Err(e) => writeln!(output, "Error: {}", e)?,
    }
    Ok(Step::Continue)
}

fn make_payment<R, I, W>(engine: &BillingEngine<R>, input: &mut I, output: &mut W) -> Result<Step>
where
    R: LoanRepository,
    I: BufRead,
    W: Write,
{
    let Some(id) = prompt(input, output, "Enter Loan ID: ")? else {
        return Ok(Step::Exit);
    };
    let id = LoanId::new(id);

    let Some(week) = prompt_week(input, output)? else {
        return Ok(Step::Exit);
    };
    let Some(week) = week else {
        return Ok(Step::Continue);
    };

    let Some(amount) = prompt(input, output, "Enter amount (blank for weekly installment): ")? else {
        return Ok(Step::Exit);
    };

    if amount.is_empty() {
        match engine.pay_installment(&id, week) {
            Ok(paid) => writeln!(output, "Payment of {:.2} successful!", paid)?,
            Err(e) => writeln!(output, "Error making payment: {}", e)?,
        }
        return Ok(Step::Continue);
    }

    let Ok(amount) = amount.parse::<Money>() else {
        writeln!(output, "Invalid amount '{}'", amount)?;
        return Ok(Step::Continue);
    };

    match engine.make_payment(&id, week, amount) {
        Ok(()) => writeln!(output, "Payment successful!")?,
        Err(e) => writeln!(output, "Error making payment: {}", e)?,
    }
    Ok(Step::Continue)
}

fn delinquency<R, I, W>(engine: &BillingEngine<R>, input: &mut I, output: &mut W) -> Result<Step>
where
    R: LoanRepository,
    I: BufRead,
    W: Write,
{
    let Some(id) = prompt(input, output, "Enter Loan ID: ")? else {
        return Ok(Step::Exit);
    };

    let Some(week) = prompt_week(input, output)? else {
        return Ok(Step::Exit);
    };
    let Some(week) = week else {
        return Ok(Step::Continue);
    };

    match engine.is_delinquent(&LoanId::new(id), week) {
        Ok(true) => writeln!(output, "Borrower is delinquent!")?,
        Ok(false) => writeln!(output, "Borrower is not delinquent.")?,
        Err(e) => writeln!(output, "Error checking delinquency: {}", e)?,
    }
    Ok(Step::Continue)
}

fn show_loan<R, I, W>(engine: &BillingEngine<R>, input: &mut I, output: &mut W) -> Result<Step>
where
    R: LoanRepository,
    I: BufRead,
    W: Write,
{
    let Some(id) = prompt(input, output, "Enter Loan ID: ")? else {
        return Ok(Step::Exit);
    };

    match engine.loan(&LoanId::new(id)) {
        Ok(loan) => writeln!(output, "{}", loan.to_json_pretty())?,
        Err(e) => writeln!(output, "Error: {}", e)?,
    }
    Ok(Step::Continue)
}

fn list_loans<R, W>(engine: &BillingEngine<R>, output: &mut W) -> Result<Step>
where
    R: LoanRepository,
    W: Write,
{
    let ids = match engine.loan_ids() {
        Ok(ids) => ids,
        Err(e) => {
            writeln!(output, "Error: {}", e)?;
            return Ok(Step::Continue);
        }
    };

    if ids.is_empty() {
        writeln!(output, "No loans yet.")?;
        return Ok(Step::Continue);
    }

    let mut rows = Vec::with_capacity(ids.len());
    for id in &ids {
        match engine.loan(id) {
            Ok(loan) => rows.push(vec![
                id.to_string(),
                format!("{:.2}", loan.outstanding_amount()),
                format!("{}/{}", loan.paid_weeks(), loan.weeks()),
                if loan.delinquent() { "yes" } else { "no" }.to_string(),
            ]),
            Err(e) => {
                writeln!(output, "Error: {}", e)?;
                return Ok(Step::Continue);
            }
        }
    }

    writeln!(
        output,
        "{}",
        pretty_table(&["Loan ID", "Outstanding", "Weeks paid", "Delinquent"], rows)
    )?;
    Ok(Step::Continue)
}
