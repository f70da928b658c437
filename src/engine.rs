//! The parallel I/O + compute execution engine.
//!
//! One `edge_map` round wires together three stages: per-device I/O workers
//! producing fetched page runs, compute (or scatter) workers parsing them
//! into edges, and on the propagation-blocking pathway gather workers
//! draining the destination-range bins. The submodules follow that split;
//! [`edge_map`] holds the orchestration.

use crate::config::{EDGE_WIDTH, PAGE_SIZE};
use crate::frontier::Frontier;
use crate::storage::DiskGraph;
use crate::types::{PageRun, Vid};

pub mod bins;
pub mod compute;
pub mod edge_map;
pub mod io;
pub mod pb;
pub mod sync;
pub mod vertex_ops;

/// Walks every (src, dst) pair contained in a fetched page run.
///
/// For each page the owning vertex range comes from the graph's
/// page-to-vertex map; each resident vertex's edge bytes are clipped to the
/// page before decoding. Vertices outside the input frontier (when one is
/// given) and empty vertices are skipped.
///
/// # Arguments
/// * `graph` - Graph store providing degrees, offsets, and the page map
/// * `in_frontier` - Membership filter; must have a materialized bitmap
/// * `run` - The fetched pages
/// * `per_edge` - Invoked once per (src, dst) pair in storage order
pub(crate) fn for_each_edge_in_run<F>(
    graph: &DiskGraph,
    in_frontier: Option<&Frontier>,
    run: &PageRun,
    mut per_edge: F,
) where
    F: FnMut(Vid, Vid),
{
    let buf = run.buf.as_slice();
    for i in 0..run.num_pages {
        let pid = graph.global_page_id(run.device, run.first_page + i as u32);
        let page_buf = &buf[i * PAGE_SIZE..(i + 1) * PAGE_SIZE];

        let (vid_lo, vid_hi) = graph.page_to_vid_range(pid);
        let page_start = pid as u64 * PAGE_SIZE as u64;
        let page_end = page_start + PAGE_SIZE as u64;

        for vid in vid_lo..=vid_hi {
            let full_degree = graph.degree(vid) as u64;
            if full_degree == 0 {
                continue;
            }
            if let Some(frontier) = in_frontier {
                if !frontier.contains(vid) {
                    continue;
                }
            }

            let offset = graph.offset(vid) * EDGE_WIDTH as u64;
            let offset_end = offset + full_degree * EDGE_WIDTH as u64;
            // The vertex owns no bytes on this page.
            if offset_end <= page_start || offset >= page_end {
                continue;
            }

            let mut degree = full_degree;
            let offset_in_buf;
            if offset < page_start {
                degree -= (page_start - offset) / EDGE_WIDTH as u64;
                offset_in_buf = 0usize;
            } else {
                offset_in_buf = (offset - page_start) as usize;
            }
            if offset_end > page_end {
                degree -= (offset_end - page_end) / EDGE_WIDTH as u64;
            }

            let bytes = &page_buf[offset_in_buf..offset_in_buf + degree as usize * EDGE_WIDTH];
            for record in bytes.chunks_exact(EDGE_WIDTH) {
                let dst = Vid::from_le_bytes(record.try_into().expect("edge record"));
                per_edge(vid, dst);
            }
        }
    }
}
