/*!
Territory state governor.

Reconciles capture signals from the primary event stream, the fallback event
stream and periodic map polls into one monotonically advancing ownership
picture per game world, and derives zone lock/unlock events from it.
*/

pub mod core;
