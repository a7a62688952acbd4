/*!
 * Protocol layer: data structures, constants, and stack handling.
 *
 * Everything related to *what* we send to the collector:
 * - `types`: Report, Context, Breadcrumb, ErrorInput, and the wire shape
 * - `constants`: SDK identity, header names, storage keys
 * - `stack`: backtrace capture and top-frame parsing
 */

pub mod constants;
pub mod stack;
pub mod types;
