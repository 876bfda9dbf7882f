//! Async utilities around Tokio runtime.

use std::future::Future;
use std::io;


/// Block on the given future with a multi-threaded Tokio runtime with time and I/O
/// enabled, the runtime is dropped when the future completes.
pub fn sync<F: Future>(future: F) -> io::Result<F::Output> {

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .enable_io()
        .build()?;

    Ok(rt.block_on(future))

}
