/*
    Tests for the core_sync subsystem

    Test suite covering:
    - Reconciler lifecycle against a hand-driven source
    - Version checking and resync
    - Destroy ordering and retention bookkeeping
    - Publisher and reconciler wired together in-process
*/
