mod entry;
mod logger;
mod shutdown;

use brokerbench::error::AppResult;

fn main() -> AppResult<()> {
    entry::run()
}
